#![forbid(unsafe_code)]

use colored::*;

fn main() {
    println!("{}", "PoQChain CLI".bright_cyan().bold());
    println!("{}", "------------".bright_cyan());
    println!();
    println!(
        "{}",
        "This is the main entry point, but the node runs as a separate binary.".yellow()
    );
    println!(
        "{}",
        "Use 'cargo run --bin <binary_name>' to run a specific command.".yellow()
    );
    println!();
    println!("{}", "Available binaries:".bright_green().underline());
    println!("  - {}", "poq-node".bright_white());
    println!();
    println!("{}", "Example:".bright_green().underline());
    println!("{}", "  cargo run --bin poq-node -- --config config.toml --validators 3".italic());
}
