#![forbid(unsafe_code)]
//! Walk a single peer through proof-of-work: a fixed block, then two mined blocks

use clap::Parser;
use colored::*;
use peerchain::announce::AnnouncementChannel;
use peerchain::blockchain::Block;
use peerchain::miner::{proof_of_work, DEFAULT_DIFFICULTY};
use peerchain::peer::{MineOutcome, Peer};
use peerchain::transaction::Transaction;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Mine blocks on a single peer", long_about = None)]
struct Cli {
    /// Leading zero hex characters required of every block hash
    #[arg(short, long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,
    /// Name of the mining peer
    #[arg(long, default_value = "Satoshi")]
    peer: String,
}

fn sample_transactions() -> Vec<Transaction> {
    vec![
        Transaction::new("Alice", "Bob", 10.0).with_data("Hello Bob!"),
        Transaction::new("Bob", "Alice", 5.0).with_data("Hello Alice!"),
    ]
}

/// The walkthrough's fixed block: every field pinned, so its hash is the same on every run.
fn fixed_block() -> Block {
    Block {
        index: 4,
        transactions: sample_transactions(),
        author: "Satoshi".to_string(),
        timestamp: 0,
        previous_hash: "000e69bd96b65c00653b4c59a5ece2f187578928460675c8317e8f91c74f8243".to_string(),
        nonce: 0,
        hash: None,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    // Peer construction rejects an out-of-range difficulty before any search starts.
    let mut peer = Peer::new(cli.peer, cli.difficulty)?;

    println!();
    println!("{}", "⛏️  PeerChain proof-of-work walkthrough".bright_cyan().bold());
    println!("{}", format!("   difficulty {}", cli.difficulty).dimmed());
    println!();

    let mut block = fixed_block();
    println!("{} {}", "Fixed block hash:  ".bright_white(), block.compute_hash());

    let start = Instant::now();
    let proof = proof_of_work(&mut block, cli.difficulty);
    println!("{} {}", "Proof of work:     ".bright_white(), proof.green());
    println!(
        "{} {} ({:.3}s)",
        "Nonce:             ".bright_white(),
        block.nonce,
        start.elapsed().as_secs_f64()
    );
    println!();

    let channel = AnnouncementChannel::new();
    for round in 1..=2 {
        for tx in sample_transactions() {
            peer.add_transaction(tx);
        }

        let start = Instant::now();
        match peer.mine(&channel)? {
            MineOutcome::Mined(block) => {
                println!(
                    "{} block #{} {} ({:.3}s)",
                    format!("Round {}:", round).bright_green().bold(),
                    block.index,
                    block.hash().unwrap_or_default(),
                    start.elapsed().as_secs_f64()
                );
            }
            other => println!("{} {:?}", format!("Round {}:", round).yellow(), other),
        }
        channel.reset();
    }

    println!();
    println!(
        "{} {} blocks, valid: {}",
        "Chain:".bright_white(),
        peer.chain().len(),
        if peer.chain().is_valid() {
            "yes".green()
        } else {
            "no".red()
        }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_block_hash_is_reproducible() {
        assert_eq!(
            fixed_block().compute_hash(),
            "47e889f9837211100e78e4fb818120563b7634ebe4c171e5edd40c7925a098ad"
        );
    }

    #[test]
    fn test_fixed_block_proof_is_reproducible() {
        let mut a = fixed_block();
        let mut b = fixed_block();
        assert_eq!(proof_of_work(&mut a, 2), proof_of_work(&mut b, 2));
        assert_eq!(a.nonce, b.nonce);
    }
}
