//! Consensus coordinator for PeerChain
//!
//! `Mainnet` owns every peer. A round moves through
//! `Idle -> MiningRound -> AwaitingWinner -> Synchronizing -> Idle`:
//! each peer mines on its own thread against its private chain, the first peer to
//! announce is the candidate winner, its chain is validated and, when valid, copied
//! over every peer's chain. Work finished by other peers in the same round is
//! discarded by that overwrite.

use crate::announce::{Announce, AnnouncementChannel};
use crate::blockchain::{check_chain_validity, Block, Blockchain};
use crate::error::ChainError;
use crate::miner::{CancelToken, DEFAULT_DIFFICULTY};
use crate::peer::{MineOutcome, Peer};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusState {
    Idle,
    MiningRound,
    AwaitingWinner,
    Synchronizing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusSettings {
    /// Leading zero hex characters every block hash must carry.
    pub difficulty: u32,
    /// Upper bound on waiting for the first announcement of a round.
    pub announce_timeout: Duration,
    /// Stop losing peers' searches as soon as a winner is known. Cancelled peers
    /// keep their mempool for the next round.
    pub cancel_losers: bool,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            announce_timeout: DEFAULT_ANNOUNCE_TIMEOUT,
            cancel_losers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerOutcome {
    Idle,
    Mined { index: u64, hash: String },
    Cancelled,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerReport {
    pub peer: String,
    pub outcome: PeerOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u64,
    /// First peer to announce, if any peer mined at all.
    pub winner: Option<String>,
    /// Whether the winner's chain passed validation and became canonical.
    pub adopted: bool,
    pub chain_length: usize,
    /// One entry per peer, in roster order.
    pub outcomes: Vec<PeerReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub length: usize,
    pub chain: Vec<Block>,
    pub current_mainnet_peer_name: String,
    pub peers: Vec<String>,
    pub difficulty: u32,
}

/// Coordinator of a set of co-located mining peers.
#[derive(Debug)]
pub struct Mainnet {
    peers: Vec<Peer>,
    canonical: Blockchain,
    canonical_peer: String,
    settings: ConsensusSettings,
    channel: AnnouncementChannel,
    state: ConsensusState,
    rounds: u64,
    wins: BTreeMap<String, u64>,
}

/// Signals the end of a mining task, including when the task unwinds.
struct FinishedGuard<'a> {
    channel: &'a AnnouncementChannel,
    peer: String,
}

impl Drop for FinishedGuard<'_> {
    fn drop(&mut self) {
        self.channel.task_finished(&self.peer);
    }
}

impl Mainnet {
    /// Peers named `peer_names`, all starting from the same freshly mined genesis.
    pub fn new<I, S>(peer_names: I, settings: ConsensusSettings) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let genesis_chain = Blockchain::new(settings.difficulty)?;
        Self::from_chain(peer_names, settings, genesis_chain)
    }

    /// Peers named `peer_names`, all starting from a copy of `chain`.
    pub fn from_chain<I, S>(peer_names: I, settings: ConsensusSettings, chain: Blockchain) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let peers = peer_names
            .into_iter()
            .map(|name| Peer::with_chain(name, chain.clone()))
            .collect();
        Self::from_peers(peers, settings)
    }

    /// Restore a coordinator from a snapshot previously taken with [`Mainnet::get_chain`].
    pub fn from_snapshot(snapshot: ChainSnapshot, settings: ConsensusSettings) -> Result<Self, ChainError> {
        if snapshot.difficulty != settings.difficulty {
            return Err(ChainError::ConfigError(format!(
                "snapshot difficulty {} does not match configured difficulty {}",
                snapshot.difficulty, settings.difficulty
            )));
        }
        let chain = Blockchain::from_blocks(snapshot.chain, snapshot.difficulty)?;
        let mut mainnet = Self::from_chain(snapshot.peers, settings, chain)?;
        if mainnet.peers.iter().any(|p| p.name() == snapshot.current_mainnet_peer_name) {
            mainnet.canonical_peer = snapshot.current_mainnet_peer_name;
        }
        Ok(mainnet)
    }

    /// Take ownership of prepared peers. The first peer's chain becomes canonical.
    pub fn from_peers(peers: Vec<Peer>, settings: ConsensusSettings) -> Result<Self, ChainError> {
        let first = peers.first().ok_or(ChainError::NoPeers)?;

        let mut seen = HashSet::new();
        for peer in &peers {
            if !seen.insert(peer.name()) {
                return Err(ChainError::DuplicatePeer(peer.name().to_string()));
            }
            if peer.difficulty() != settings.difficulty {
                return Err(ChainError::ConfigError(format!(
                    "peer {} mines at difficulty {}, expected {}",
                    peer.name(),
                    peer.difficulty(),
                    settings.difficulty
                )));
            }
        }

        if !check_chain_validity(first.chain().blocks(), settings.difficulty) {
            return Err(ChainError::ChainValidationFailure(first.name().to_string()));
        }

        let canonical = first.chain().clone();
        let canonical_peer = first.name().to_string();
        let wins = peers.iter().map(|p| (p.name().to_string(), 0)).collect();

        Ok(Self {
            peers,
            canonical,
            canonical_peer,
            settings,
            channel: AnnouncementChannel::new(),
            state: ConsensusState::Idle,
            rounds: 0,
            wins,
        })
    }

    pub fn submit_transaction(&mut self, peer_name: &str, tx: Transaction) -> Result<(), ChainError> {
        self.peer_mut(peer_name)?.add_transaction(tx);
        Ok(())
    }

    /// Pending transaction descriptions per peer.
    pub fn pending_transactions(&self) -> BTreeMap<String, Vec<String>> {
        self.peers
            .iter()
            .map(|p| (p.name().to_string(), p.mempool().descriptions()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.peers.iter().map(|p| p.mempool().len()).sum()
    }

    /// Copy of the canonical chain plus its length, source peer and the roster.
    pub fn get_chain(&self) -> ChainSnapshot {
        ChainSnapshot {
            length: self.canonical.len(),
            chain: self.canonical.blocks().to_vec(),
            current_mainnet_peer_name: self.canonical_peer.clone(),
            peers: self.peer_names(),
            difficulty: self.canonical.difficulty(),
        }
    }

    pub fn canonical_chain(&self) -> &Blockchain {
        &self.canonical
    }

    pub fn canonical_peer(&self) -> &str {
        &self.canonical_peer
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn peer(&self, name: &str) -> Result<&Peer, ChainError> {
        self.peers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| ChainError::UnknownPeer(name.to_string()))
    }

    fn peer_mut(&mut self, name: &str) -> Result<&mut Peer, ChainError> {
        self.peers
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| ChainError::UnknownPeer(name.to_string()))
    }

    pub fn state(&self) -> ConsensusState {
        self.state
    }

    pub fn settings(&self) -> &ConsensusSettings {
        &self.settings
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds
    }

    /// Rounds won per peer.
    pub fn wins(&self) -> &BTreeMap<String, u64> {
        &self.wins
    }

    /// Run one full round: mine on every peer concurrently, take the first
    /// announcer, validate its chain and synchronize every peer to the result.
    ///
    /// Blocks until all mining tasks have been joined. Failures inside a peer's
    /// task are reported in the returned outcomes; only a missing roster or a
    /// round with no announcement inside the timeout fail the call.
    pub fn run_round(&mut self) -> Result<RoundReport, ChainError> {
        if self.peers.is_empty() {
            return Err(ChainError::NoPeers);
        }

        self.rounds += 1;
        let round = self.rounds;
        info!(round, peers = self.peers.len(), "Consensus round started");

        self.channel.reset();
        self.set_state(ConsensusState::MiningRound);
        let (winner, outcomes) = self.mine_concurrently();

        let winner = match winner {
            Ok(winner) => winner,
            Err(e) => {
                error!(round, error = %e, "Round aborted");
                self.synchronize_peers();
                self.finish_round();
                return Err(e);
            }
        };

        let adopted = match &winner {
            Some(name) => {
                self.set_state(ConsensusState::Synchronizing);
                let adopted = self.consensus(name);
                self.synchronize_peers();
                adopted
            }
            None => {
                info!(round, "No blocks mined this round");
                false
            }
        };

        self.finish_round();

        Ok(RoundReport {
            round,
            winner,
            adopted,
            chain_length: self.canonical.len(),
            outcomes,
        })
    }

    fn mine_concurrently(&mut self) -> (Result<Option<String>, ChainError>, Vec<PeerReport>) {
        let tasks = self.peers.len();
        let timeout = self.settings.announce_timeout;
        let cancel_losers = self.settings.cancel_losers;
        let cancel = CancelToken::new();

        let peers = &mut self.peers;
        let channel = &self.channel;
        let state = &mut self.state;

        thread::scope(|scope| {
            let handles: Vec<_> = peers
                .iter_mut()
                .map(|peer| {
                    let name = peer.name().to_string();
                    let cancel = cancel.clone();
                    let handle = scope.spawn(move || {
                        let _finished = FinishedGuard {
                            channel,
                            peer: peer.name().to_string(),
                        };
                        let announcer: &dyn Announce = channel;
                        peer.mine_with_cancel(announcer, &cancel)
                    });
                    (name, handle)
                })
                .collect();

            *state = ConsensusState::AwaitingWinner;
            info!(state = ?ConsensusState::AwaitingWinner, "Coordinator state changed");

            let winner = channel.await_round(tasks, timeout);
            match &winner {
                Ok(Some(name)) => {
                    info!(peer = %name, "First peer announced a block");
                    if cancel_losers {
                        cancel.cancel();
                    }
                }
                Ok(None) => {}
                Err(_) => cancel.cancel(),
            }

            let outcomes = handles
                .into_iter()
                .map(|(peer, handle)| {
                    let outcome = match handle.join() {
                        Ok(Ok(MineOutcome::Idle)) => PeerOutcome::Idle,
                        Ok(Ok(MineOutcome::Mined(block))) => PeerOutcome::Mined {
                            index: block.index,
                            hash: block.hash.unwrap_or_default(),
                        },
                        Ok(Ok(MineOutcome::Cancelled)) => PeerOutcome::Cancelled,
                        Ok(Err(e)) => {
                            warn!(peer = %peer, error = %e, "Mining failed");
                            PeerOutcome::Failed { error: e.to_string() }
                        }
                        Err(_) => {
                            error!(peer = %peer, "Mining task panicked");
                            PeerOutcome::Failed {
                                error: "mining task panicked".to_string(),
                            }
                        }
                    };
                    PeerReport { peer, outcome }
                })
                .collect();

            (winner, outcomes)
        })
    }

    /// Adopt the winner's chain if it validates. Returns whether it was adopted.
    fn consensus(&mut self, winner: &str) -> bool {
        info!(peer = %winner, "Consensus started");

        let Some(candidate) = self.peers.iter().find(|p| p.name() == winner) else {
            error!(peer = %winner, "Announced peer is not in the roster");
            return false;
        };

        if !check_chain_validity(candidate.chain().blocks(), self.settings.difficulty) {
            error!(peer = %winner, "Invalid longest chain");
            return false;
        }

        self.canonical = candidate.chain().clone();
        self.canonical_peer = winner.to_string();
        *self.wins.entry(winner.to_string()).or_default() += 1;
        info!(
            peer = %winner,
            length = self.canonical.len(),
            hash = ?self.canonical.last_block().and_then(Block::hash),
            "Consensus done with new chain"
        );
        true
    }

    /// Overwrite every peer's chain with a copy of the canonical chain.
    fn synchronize_peers(&mut self) {
        for peer in &mut self.peers {
            peer.replace_chain(self.canonical.clone());
        }
    }

    fn finish_round(&mut self) {
        self.channel.reset();
        self.set_state(ConsensusState::Idle);
    }

    fn set_state(&mut self, state: ConsensusState) {
        self.state = state;
        info!(state = ?state, "Coordinator state changed");
    }

    #[cfg(test)]
    pub(crate) fn peer_for_test(&mut self, name: &str) -> &mut Peer {
        self.peer_mut(name).expect("peer exists")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::MiningFault;

    fn settings(difficulty: u32) -> ConsensusSettings {
        ConsensusSettings {
            difficulty,
            announce_timeout: Duration::from_secs(30),
            cancel_losers: false,
        }
    }

    fn tx(n: u32) -> Transaction {
        Transaction::new(format!("Alice{n}"), format!("Bob{n}"), n as f64)
    }

    #[test]
    fn test_requires_peers() {
        let names: Vec<String> = Vec::new();
        assert!(matches!(Mainnet::new(names, settings(1)), Err(ChainError::NoPeers)));
    }

    #[test]
    fn test_rejects_duplicate_peers() {
        let result = Mainnet::new(["a", "b", "a"], settings(1));
        assert!(matches!(result, Err(ChainError::DuplicatePeer(name)) if name == "a"));
    }

    #[test]
    fn test_rejects_peer_with_other_difficulty() {
        let peers = vec![Peer::new("a", 1).unwrap(), Peer::new("b", 2).unwrap()];
        assert!(matches!(
            Mainnet::from_peers(peers, settings(1)),
            Err(ChainError::ConfigError(_))
        ));
    }

    #[test]
    fn test_submit_to_unknown_peer_fails() {
        let mut mainnet = Mainnet::new(["a"], settings(1)).unwrap();
        let result = mainnet.submit_transaction("nobody", tx(1));
        assert!(matches!(result, Err(ChainError::UnknownPeer(name)) if name == "nobody"));
        assert_eq!(mainnet.pending_count(), 0);
    }

    #[test]
    fn test_pending_transactions_per_peer() {
        let mut mainnet = Mainnet::new(["a", "b"], settings(1)).unwrap();
        mainnet.submit_transaction("a", tx(1)).unwrap();
        mainnet.submit_transaction("a", tx(2)).unwrap();

        let pending = mainnet.pending_transactions();
        assert_eq!(pending["a"].len(), 2);
        assert!(pending["b"].is_empty());
        assert_eq!(mainnet.pending_count(), 2);
    }

    #[test]
    fn test_idle_round_changes_nothing() {
        let mut mainnet = Mainnet::new(["a", "b"], settings(1)).unwrap();
        let before = mainnet.get_chain();

        let report = mainnet.run_round().unwrap();
        assert_eq!(report.winner, None);
        assert!(!report.adopted);
        assert!(report.outcomes.iter().all(|r| r.outcome == PeerOutcome::Idle));
        assert_eq!(mainnet.get_chain(), before);
        assert_eq!(mainnet.state(), ConsensusState::Idle);
    }

    #[test]
    fn test_single_peer_round_adopts_its_chain() {
        let mut mainnet = Mainnet::new(["solo"], settings(2)).unwrap();
        mainnet.submit_transaction("solo", tx(1)).unwrap();

        let report = mainnet.run_round().unwrap();
        assert_eq!(report.round, 1);
        assert_eq!(report.winner.as_deref(), Some("solo"));
        assert!(report.adopted);
        assert_eq!(report.chain_length, 2);
        assert_eq!(mainnet.canonical_peer(), "solo");
        assert_eq!(mainnet.wins()["solo"], 1);
        assert_eq!(mainnet.pending_count(), 0);
        assert_eq!(mainnet.state(), ConsensusState::Idle);
    }

    #[test]
    fn test_invalid_winner_chain_is_not_adopted() {
        let mut mainnet = Mainnet::new(["solo", "idle"], settings(1)).unwrap();
        let before = mainnet.get_chain();

        // Tamper with genesis contents but keep its stored hash, so mining on top
        // still links while the chain no longer validates.
        mainnet.peer_for_test("solo").chain_mut().blocks_mut()[0].author = "Mallory".to_string();
        mainnet.submit_transaction("solo", tx(1)).unwrap();

        let report = mainnet.run_round().unwrap();
        assert_eq!(report.winner.as_deref(), Some("solo"));
        assert!(!report.adopted);
        assert_eq!(mainnet.get_chain(), before);
        assert_eq!(mainnet.wins()["solo"], 0);
        for peer in mainnet.peers() {
            assert_eq!(peer.chain(), mainnet.canonical_chain());
        }
    }

    #[test]
    fn test_cancelling_losers_still_converges() {
        let mut config = settings(2);
        config.cancel_losers = true;
        let mut mainnet = Mainnet::new(["a", "b", "c"], config).unwrap();
        for name in ["a", "b", "c"] {
            mainnet.submit_transaction(name, tx(1)).unwrap();
        }

        let report = mainnet.run_round().unwrap();
        assert!(report.adopted);
        assert_eq!(report.chain_length, 2);
        for peer in mainnet.peers() {
            assert_eq!(peer.chain(), mainnet.canonical_chain());
        }
        for entry in &report.outcomes {
            let peer = mainnet.peer(&entry.peer).unwrap();
            match entry.outcome {
                PeerOutcome::Cancelled => assert_eq!(peer.mempool().len(), 1),
                PeerOutcome::Mined { .. } => assert!(peer.mempool().is_empty()),
                ref other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_timeout_aborts_round_and_keeps_state() {
        let mut config = settings(1);
        config.announce_timeout = Duration::from_millis(200);
        config.cancel_losers = true;
        let mut mainnet = Mainnet::new(["slow", "idle"], config).unwrap();
        let before = mainnet.get_chain();

        mainnet.peer_for_test("slow").inject_fault(MiningFault::Stall);
        mainnet.submit_transaction("slow", tx(1)).unwrap();

        let result = mainnet.run_round();
        assert_eq!(result, Err(ChainError::AnnouncementTimeout(200)));
        assert_eq!(mainnet.state(), ConsensusState::Idle);
        assert_eq!(mainnet.get_chain(), before);
        assert_eq!(mainnet.peer("slow").unwrap().mempool().len(), 1);
        for peer in mainnet.peers() {
            assert_eq!(peer.chain(), mainnet.canonical_chain());
        }

        // The channel is clean for the next round; the stalled peer is cancelled once
        // the other peer wins.
        mainnet.submit_transaction("idle", tx(2)).unwrap();
        let report = mainnet.run_round().unwrap();
        assert_eq!(report.winner.as_deref(), Some("idle"));
        assert_eq!(mainnet.rounds_completed(), 2);
    }

    #[test]
    fn test_panicking_peer_is_reported_as_failed() {
        let mut mainnet = Mainnet::new(["crash", "steady"], settings(1)).unwrap();
        mainnet.peer_for_test("crash").inject_fault(MiningFault::Panic);
        mainnet.submit_transaction("crash", tx(1)).unwrap();
        mainnet.submit_transaction("steady", tx(2)).unwrap();

        let report = mainnet.run_round().unwrap();
        assert_eq!(report.winner.as_deref(), Some("steady"));
        assert!(report.adopted);

        let crash = report.outcomes.iter().find(|r| r.peer == "crash").unwrap();
        assert!(matches!(crash.outcome, PeerOutcome::Failed { .. }));
        assert_eq!(mainnet.peer("crash").unwrap().chain(), mainnet.canonical_chain());
        assert_eq!(mainnet.state(), ConsensusState::Idle);
    }

    #[test]
    fn test_panicking_sole_miner_still_finishes_round() {
        // Nobody announces, so the round can only end through the finished
        // signal sent while the panicking task unwinds.
        let mut mainnet = Mainnet::new(["crash", "idle"], settings(1)).unwrap();
        let before = mainnet.get_chain();
        mainnet.peer_for_test("crash").inject_fault(MiningFault::Panic);
        mainnet.submit_transaction("crash", tx(1)).unwrap();

        let started = std::time::Instant::now();
        let report = mainnet.run_round().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.winner, None);
        assert!(!report.adopted);
        assert_eq!(
            report.outcomes.iter().map(|r| &r.outcome).collect::<Vec<_>>(),
            vec![
                &PeerOutcome::Failed {
                    error: "mining task panicked".to_string()
                },
                &PeerOutcome::Idle
            ]
        );
        assert_eq!(mainnet.get_chain(), before);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut mainnet = Mainnet::new(["a", "b"], settings(1)).unwrap();
        mainnet.submit_transaction("b", tx(1)).unwrap();
        mainnet.run_round().unwrap();
        let snapshot = mainnet.get_chain();

        let restored = Mainnet::from_snapshot(snapshot.clone(), settings(1)).unwrap();
        assert_eq!(restored.get_chain(), snapshot);
        assert_eq!(restored.canonical_peer(), "b");

        assert!(matches!(
            Mainnet::from_snapshot(snapshot, settings(2)),
            Err(ChainError::ConfigError(_))
        ));
    }
}
