//! Tunable parameters governing timing, snapshotting and membership
//! catch-up, gathered into one struct with validated setters.

use crate::error::{Result, ErrorKind};

/// Tunables governing timing, snapshotting and membership catch-up.
///
/// Construct with [`Config::default`] and adjust with the `set_*` methods,
/// each of which validates its argument instead of silently accepting
/// nonsensical values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    election_timeout_ms: u64,
    heartbeat_timeout_ms: u64,
    install_snapshot_timeout_ms: u64,
    snapshot_threshold: u64,
    snapshot_trailing: u64,
    max_catch_up_rounds: u32,
    max_catch_up_round_duration_ms: u64,
    pre_vote: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            election_timeout_ms: 1000,
            heartbeat_timeout_ms: 100,
            install_snapshot_timeout_ms: 30_000,
            snapshot_threshold: 1024,
            snapshot_trailing: 2048,
            max_catch_up_rounds: 10,
            max_catch_up_round_duration_ms: 5000,
            pre_vote: false,
        }
    }
}

impl Config {
    pub fn election_timeout_ms(&self) -> u64 {
        self.election_timeout_ms
    }

    pub fn heartbeat_timeout_ms(&self) -> u64 {
        self.heartbeat_timeout_ms
    }

    pub fn install_snapshot_timeout_ms(&self) -> u64 {
        self.install_snapshot_timeout_ms
    }

    pub fn snapshot_threshold(&self) -> u64 {
        self.snapshot_threshold
    }

    pub fn snapshot_trailing(&self) -> u64 {
        self.snapshot_trailing
    }

    pub fn max_catch_up_rounds(&self) -> u32 {
        self.max_catch_up_rounds
    }

    pub fn max_catch_up_round_duration_ms(&self) -> u64 {
        self.max_catch_up_round_duration_ms
    }

    pub fn pre_vote(&self) -> bool {
        self.pre_vote
    }

    /// Accepts any positive value, including unrealistically short ones
    /// used in tests, without silently inflating it.
    pub fn set_election_timeout(&mut self, msecs: u64) -> Result<()> {
        if msecs == 0 {
            return Err(ErrorKind::BadParam("election_timeout must be > 0".into()).into());
        }
        self.election_timeout_ms = msecs;
        Ok(())
    }

    pub fn set_heartbeat_timeout(&mut self, msecs: u64) -> Result<()> {
        if msecs == 0 {
            return Err(ErrorKind::BadParam("heartbeat_timeout must be > 0".into()).into());
        }
        self.heartbeat_timeout_ms = msecs;
        Ok(())
    }

    pub fn set_install_snapshot_timeout(&mut self, msecs: u64) -> Result<()> {
        if msecs == 0 {
            return Err(ErrorKind::BadParam("install_snapshot_timeout must be > 0".into()).into());
        }
        self.install_snapshot_timeout_ms = msecs;
        Ok(())
    }

    pub fn set_snapshot_threshold(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(ErrorKind::BadParam("snapshot_threshold must be > 0".into()).into());
        }
        self.snapshot_threshold = n;
        Ok(())
    }

    pub fn set_snapshot_trailing(&mut self, n: u64) -> Result<()> {
        self.snapshot_trailing = n;
        Ok(())
    }

    pub fn set_max_catch_up_rounds(&mut self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(ErrorKind::BadParam("max_catch_up_rounds must be > 0".into()).into());
        }
        self.max_catch_up_rounds = n;
        Ok(())
    }

    pub fn set_max_catch_up_round_duration(&mut self, msecs: u64) -> Result<()> {
        if msecs == 0 {
            return Err(
                ErrorKind::BadParam("max_catch_up_round_duration must be > 0".into()).into(),
            );
        }
        self.max_catch_up_round_duration_ms = msecs;
        Ok(())
    }

    pub fn set_pre_vote(&mut self, enabled: bool) {
        self.pre_vote = enabled;
    }
}
