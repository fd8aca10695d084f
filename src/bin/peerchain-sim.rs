#![forbid(unsafe_code)]
//! Race a set of peers through consensus rounds and report who won

use clap::Parser;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use peerchain::config::{load_config, load_config_from};
use peerchain::consensus::{Mainnet, PeerOutcome};
use peerchain::error::ChainError;
use peerchain::persistence::Database;
use peerchain::transaction::Transaction;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Simulate concurrent peers mining and synchronizing", long_about = None)]
struct Cli {
    /// Number of consensus rounds to run
    #[arg(short, long, default_value_t = 3)]
    rounds: u64,
    /// Transactions submitted to every peer before each round
    #[arg(short, long, default_value_t = 5)]
    transactions: usize,
    /// Number of peers (overrides the configured roster; rejected when restoring a chain)
    #[arg(short, long)]
    peers: Option<usize>,
    /// Difficulty override
    #[arg(short, long)]
    difficulty: Option<u32>,
    /// Stop losing peers as soon as a winner announces
    #[arg(long)]
    cancel_losers: bool,
    /// Configuration file (defaults to ./config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite file to restore from and save to
    #[arg(long)]
    db: Option<String>,
}

/// A restored snapshot keeps its own roster, so `--peers` cannot be honoured.
fn reject_roster_override(peers: Option<usize>) -> Result<(), ChainError> {
    match peers {
        Some(count) => Err(ChainError::ConfigError(format!(
            "--peers {} conflicts with the roster restored from the database",
            count
        ))),
        None => Ok(()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(count) = cli.peers {
        config.consensus.peers = (0..count).map(|n| format!("Satoshi{}", n + 3)).collect();
    }
    if let Some(difficulty) = cli.difficulty {
        config.consensus.difficulty = difficulty;
    }
    config.consensus.cancel_losers |= cli.cancel_losers;
    config.validate()?;
    let settings = config.settings();

    let db_path = cli.db.as_deref().or_else(|| config.database_path());
    let store = db_path.map(Database::open).transpose()?;

    let restored = match &store {
        Some(db) => db.load_chain()?,
        None => None,
    };
    let mut mainnet = match restored {
        Some(snapshot) => {
            reject_roster_override(cli.peers)?;
            info!(length = snapshot.length, peers = ?snapshot.peers, "Restoring chain from database");
            Mainnet::from_snapshot(snapshot, settings)?
        }
        None => Mainnet::new(config.consensus.peers.clone(), settings)?,
    };

    println!();
    println!("{}", "🏁 PeerChain simulation".bright_cyan().bold());
    println!(
        "{}",
        format!(
            "   {} peers, {} rounds, {} transactions per peer, difficulty {}",
            mainnet.peers().len(),
            cli.rounds,
            cli.transactions,
            mainnet.settings().difficulty
        )
        .dimmed()
    );
    println!();

    let progress = ProgressBar::new(cli.rounds);
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );

    let started = Instant::now();
    let first_round = mainnet.rounds_completed() + 1;
    for round in first_round..first_round + cli.rounds {
        for name in mainnet.peer_names() {
            for n in 0..cli.transactions {
                let tx = Transaction::new(format!("Alice{}", n), format!("Bob{}", n), (round * 10 + n as u64) as f64)
                    .with_data(format!("round {} via {}", round, name));
                mainnet.submit_transaction(&name, tx)?;
            }
        }

        let report = mainnet.run_round()?;
        let failed = report
            .outcomes
            .iter()
            .filter(|r| matches!(r.outcome, PeerOutcome::Failed { .. }))
            .count();
        if failed > 0 {
            warn!(round = report.round, failed, "Some peers failed to mine");
        }

        if report.adopted {
            if let Some(db) = &store {
                db.save_chain(&mainnet.get_chain())?;
            }
        }

        progress.set_message(format!(
            "winner: {}",
            report.winner.as_deref().unwrap_or("none")
        ));
        progress.inc(1);
    }
    progress.finish_with_message("done");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Peer").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Wins").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Chain length").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Pending").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
        ]);

    for peer in mainnet.peers() {
        let wins = mainnet.wins().get(peer.name()).copied().unwrap_or(0);
        let color = if peer.name() == mainnet.canonical_peer() {
            TableColor::Green
        } else {
            TableColor::White
        };
        table.add_row(vec![
            Cell::new(peer.name()).fg(color),
            Cell::new(wins).fg(color),
            Cell::new(peer.chain().len()).fg(TableColor::White),
            Cell::new(peer.mempool().len()).fg(TableColor::Grey),
        ]);
    }

    println!();
    println!("{}", table);
    println!();

    let snapshot = mainnet.get_chain();
    let synchronized = mainnet
        .peers()
        .iter()
        .all(|peer| peer.chain() == mainnet.canonical_chain());
    println!(
        "{} {} blocks from {} in {:.2}s",
        "Canonical chain:".bright_white().bold(),
        snapshot.length,
        snapshot.current_mainnet_peer_name.bright_green(),
        started.elapsed().as_secs_f64()
    );
    println!(
        "{} {}",
        "Valid:".bright_white().bold(),
        if mainnet.canonical_chain().is_valid() {
            "yes".green()
        } else {
            "no".red()
        }
    );
    println!(
        "{} {}",
        "All peers synchronized:".bright_white().bold(),
        if synchronized { "yes".green() } else { "no".red() }
    );
    println!();

    Ok(())
}
