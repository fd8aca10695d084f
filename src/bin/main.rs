#![forbid(unsafe_code)]

use colored::*;

fn main() {
    println!("{}", "PeerChain CLI".bright_cyan().bold());
    println!("{}", "-------------".bright_cyan());
    println!();
    println!(
        "{}",
        "This is the main entry point, but most functionality is in separate binaries.".yellow()
    );
    println!(
        "{}",
        "Use 'cargo run --bin <binary_name>' to run a specific command.".yellow()
    );
    println!();
    println!("{}", "Available binaries:".bright_green().underline());
    println!(
        "  - {}  {}",
        "peerchain-sim".bright_white(),
        "race peers through consensus rounds".dimmed()
    );
    println!(
        "  - {}  {}",
        "peerchain-mine-block".bright_white(),
        "walk one peer through proof-of-work".dimmed()
    );
    println!(
        "  - {}  {}",
        "peerchain-server".bright_white(),
        "serve the HTTP query API".dimmed()
    );
    println!();
    println!("{}", "Example:".bright_green().underline());
    println!("{}", "  cargo run --bin peerchain-sim -- --rounds 5".italic());
}
