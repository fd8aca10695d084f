//! In-memory announcement channel between mining peers and the coordinator
//!
//! Peers publish their name when they append a block. The coordinator takes the
//! first announcement it receives after a reset as the round winner; anything
//! published later in the same round is informational and drained on reset.

use crate::error::ChainError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Publishing side of the channel, handed to a peer while it mines.
pub trait Announce: Send + Sync {
    fn announce(&self, peer_name: &str);
}

#[derive(Debug)]
enum Signal {
    Announced(String),
    Finished(String),
}

/// Single-slot, first-writer-wins channel.
#[derive(Debug)]
pub struct AnnouncementChannel {
    sender: Sender<Signal>,
    receiver: Receiver<Signal>,
    winner: Mutex<Option<String>>,
}

impl Default for AnnouncementChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnouncementChannel {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            winner: Mutex::new(None),
        }
    }

    /// Record that a mining task ended, whatever its result.
    pub fn task_finished(&self, peer_name: &str) {
        let _ = self.sender.send(Signal::Finished(peer_name.to_string()));
    }

    /// The winner observed since the last reset, if any.
    pub fn winner(&self) -> Option<String> {
        self.winner.lock().clone()
    }

    /// Block until the first announcement since the last reset.
    pub fn await_announcement(&self, timeout: Duration) -> Result<String, ChainError> {
        match self.wait(None, timeout)? {
            Some(winner) => Ok(winner),
            None => Err(ChainError::AnnouncementTimeout(timeout_millis(timeout))),
        }
    }

    /// Block until the first announcement, or until `tasks` mining tasks have
    /// finished without anyone announcing (`Ok(None)`).
    pub fn await_round(&self, tasks: usize, timeout: Duration) -> Result<Option<String>, ChainError> {
        self.wait(Some(tasks), timeout)
    }

    /// Clear the winner and drain everything still queued. Returns the names of
    /// peers that announced after the winner was taken.
    pub fn reset(&self) -> Vec<String> {
        let mut winner = self.winner.lock();
        *winner = None;

        let late: Vec<String> = self
            .receiver
            .try_iter()
            .filter_map(|signal| match signal {
                Signal::Announced(name) => Some(name),
                Signal::Finished(_) => None,
            })
            .collect();
        for name in &late {
            debug!(peer = %name, "late announcement discarded");
        }
        late
    }

    fn wait(&self, tasks: Option<usize>, timeout: Duration) -> Result<Option<String>, ChainError> {
        if let Some(winner) = self.winner() {
            return Ok(Some(winner));
        }

        let deadline = Instant::now() + timeout;
        let mut finished = 0usize;
        loop {
            if tasks.is_some_and(|tasks| finished >= tasks) {
                return Ok(None);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(Signal::Announced(name)) => {
                    *self.winner.lock() = Some(name.clone());
                    return Ok(Some(name));
                }
                Ok(Signal::Finished(name)) => {
                    debug!(peer = %name, "mining task finished");
                    finished += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(ChainError::AnnouncementTimeout(timeout_millis(timeout)));
                }
            }
        }
    }
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl Announce for AnnouncementChannel {
    fn announce(&self, peer_name: &str) {
        let _ = self.sender.send(Signal::Announced(peer_name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_first_announcement_wins() {
        let channel = AnnouncementChannel::new();
        channel.announce("Satoshi4");
        channel.announce("Satoshi3");

        assert_eq!(channel.await_announcement(WAIT).unwrap(), "Satoshi4");
        assert_eq!(channel.winner(), Some("Satoshi4".to_string()));
        // Asking again does not consume the next announcement.
        assert_eq!(channel.await_announcement(WAIT).unwrap(), "Satoshi4");
    }

    #[test]
    fn test_reset_clears_winner_and_reports_late_announcements() {
        let channel = AnnouncementChannel::new();
        channel.announce("a");
        channel.announce("b");
        channel.task_finished("a");
        channel.await_announcement(WAIT).unwrap();

        assert_eq!(channel.reset(), vec!["b".to_string()]);
        assert_eq!(channel.winner(), None);

        channel.announce("c");
        assert_eq!(channel.await_announcement(WAIT).unwrap(), "c");
    }

    #[test]
    fn test_round_without_announcement_ends_when_all_tasks_finish() {
        let channel = AnnouncementChannel::new();
        channel.task_finished("a");
        channel.task_finished("b");
        assert_eq!(channel.await_round(2, WAIT).unwrap(), None);
    }

    #[test]
    fn test_announcement_after_some_finishes_still_wins() {
        let channel = AnnouncementChannel::new();
        channel.task_finished("idle");
        channel.announce("miner");
        channel.task_finished("miner");
        assert_eq!(channel.await_round(2, WAIT).unwrap(), Some("miner".to_string()));
    }

    #[test]
    fn test_timeout_when_nobody_announces() {
        let channel = AnnouncementChannel::new();
        let result = channel.await_announcement(Duration::from_millis(20));
        assert_eq!(result, Err(ChainError::AnnouncementTimeout(20)));
        assert_eq!(
            result.unwrap_err().to_string(),
            "No peer announced a block within 20 ms"
        );
    }

    #[test]
    fn test_controlled_completion_order_across_threads() {
        let channel = AnnouncementChannel::new();
        let (go_second, wait_second) = crossbeam_channel::bounded::<()>(0);

        thread::scope(|scope| {
            let channel = &channel;
            scope.spawn(move || {
                wait_second.recv().unwrap();
                channel.announce("second");
            });
            scope.spawn(move || {
                channel.announce("first");
                go_second.send(()).unwrap();
            });

            assert_eq!(channel.await_announcement(WAIT).unwrap(), "first");
        });

        assert_eq!(channel.reset(), vec!["second".to_string()]);
    }
}
