//! Secret subcommand implementation

use backhaul_core::AuthSecret;

pub fn run() {
    println!("{}", AuthSecret::generate().expose());
}
