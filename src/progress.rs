//! Per-follower replication progress, tracked by the leader only: which
//! state a follower's replication is in (probe, pipeline or snapshot
//! streaming), and the bookkeeping each state needs.

use crate::entry::{LogIndex, ServerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Send one AppendEntries at a time and wait for the reply before
    /// sending another.
    Probe,
    /// May have multiple AppendEntries in flight without waiting.
    Pipeline,
    /// Shipping an InstallSnapshot chunk stream because the follower needs
    /// entries that have already been compacted away.
    Snapshot,
}

/// Replication bookkeeping for one follower (or, transiently, the leader
/// itself, which always reports `match_index == last_index`).
#[derive(Debug, Clone)]
pub struct Progress {
    pub next_index: LogIndex,
    pub match_index: LogIndex,
    pub state: ProgressState,
    pub last_send_time: Option<u64>,
    pub last_recv_time: Option<u64>,
    pub request_pending: bool,
    /// Index of the snapshot currently being streamed, if `state == Snapshot`.
    pub snapshot_index: Option<LogIndex>,
    /// Byte offset of the next snapshot chunk to ship.
    pub snapshot_offset: u64,
    /// How many catch-up rounds this server has gone through while joining
    /// or being promoted.
    pub catch_up_round: u32,
    pub catch_up_round_start: Option<u64>,
    /// The leader's `last_index` as of the start of the current round; the
    /// round ends once `match_index` reaches it.
    pub catch_up_round_index: LogIndex,
    /// Set once the leader has sent (not yet acked) the final chunk of an
    /// InstallSnapshot stream, so the next acked offset is known to close
    /// out the stream rather than request another chunk.
    pub awaiting_final_ack: bool,
}

impl Progress {
    pub fn new(last_index: LogIndex) -> Self {
        Progress {
            next_index: last_index + 1,
            match_index: 0,
            state: ProgressState::Probe,
            last_send_time: None,
            last_recv_time: None,
            request_pending: false,
            snapshot_index: None,
            snapshot_offset: 0,
            catch_up_round: 0,
            catch_up_round_start: None,
            catch_up_round_index: 0,
            awaiting_final_ack: false,
        }
    }

    /// Leader's own entry: always caught up, never probed or sent to.
    pub fn for_self(last_index: LogIndex) -> Self {
        let mut p = Progress::new(last_index);
        p.match_index = last_index;
        p.state = ProgressState::Pipeline;
        p
    }

    pub fn on_append_accepted(&mut self, matched_through: LogIndex, recv_time: u64) {
        if matched_through > self.match_index {
            self.match_index = matched_through;
            self.next_index = matched_through + 1;
        }
        self.last_recv_time = Some(recv_time);
        self.request_pending = false;
        if self.state == ProgressState::Probe {
            self.state = ProgressState::Pipeline;
        }
    }

    /// `hint` is the follower's own `last_index`, used to skip straight to
    /// the real conflict point instead of decrementing one at a time.
    pub fn on_append_rejected(&mut self, hint: Option<LogIndex>, recv_time: u64) {
        self.last_recv_time = Some(recv_time);
        self.request_pending = false;
        self.state = ProgressState::Probe;
        let decremented = self.next_index.saturating_sub(1).max(1);
        self.next_index = match hint {
            Some(h) => decremented.min(h + 1),
            None => decremented,
        };
    }

    pub fn enter_snapshot(&mut self, snapshot_index: LogIndex) {
        self.state = ProgressState::Snapshot;
        self.snapshot_index = Some(snapshot_index);
        self.snapshot_offset = 0;
        self.request_pending = false;
        self.awaiting_final_ack = false;
    }

    pub fn on_snapshot_done(&mut self, last_index: LogIndex, recv_time: u64) {
        self.state = ProgressState::Pipeline;
        self.snapshot_index = None;
        self.snapshot_offset = 0;
        self.match_index = last_index;
        self.next_index = last_index + 1;
        self.last_recv_time = Some(recv_time);
        self.request_pending = false;
        self.awaiting_final_ack = false;
    }

    pub fn is_stale(&self, now: u64, timeout_ms: u64) -> bool {
        match self.last_send_time {
            Some(t) => now.saturating_sub(t) >= timeout_ms,
            None => true,
        }
    }

    pub fn start_catch_up_round(&mut self, leader_last_index: LogIndex, now: u64) {
        self.catch_up_round += 1;
        self.catch_up_round_start = Some(now);
        self.catch_up_round_index = leader_last_index;
    }

    pub fn catch_up_round_finished(&self) -> bool {
        self.match_index >= self.catch_up_round_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_promotes_probe_to_pipeline() {
        let mut p = Progress::new(10);
        assert_eq!(p.state, ProgressState::Probe);
        p.on_append_accepted(10, 100);
        assert_eq!(p.state, ProgressState::Pipeline);
        assert_eq!(p.match_index, 10);
        assert_eq!(p.next_index, 11);
    }

    #[test]
    fn reject_uses_hint_to_skip_ahead() {
        let mut p = Progress::new(10);
        p.next_index = 11;
        p.on_append_rejected(Some(4), 100);
        assert_eq!(p.state, ProgressState::Probe);
        assert_eq!(p.next_index, 5);
    }

    #[test]
    fn reject_without_hint_decrements_by_one() {
        let mut p = Progress::new(10);
        p.next_index = 11;
        p.on_append_rejected(None, 100);
        assert_eq!(p.next_index, 10);
    }
}
