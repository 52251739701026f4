//! Stream multiplexer
//!
//! Carries many independent logical byte streams over one physical
//! connection. A session is created with a [`Role`]: the [`Role::Opener`]
//! side creates streams, the [`Role::Acceptor`] side receives them. Which
//! side dialed the physical connection does not matter.

mod config;
mod session;
mod stream;
mod window;
mod writer;

pub use config::{MuxConfig, Role};
pub use session::Session;
pub use stream::VirtualStream;
