//! Cluster membership: the ordered roster of servers, and the tracking of
//! which configuration is in effect vs. committed.

use serde_derive::{Deserialize, Serialize};

use crate::entry::{Entry, EntryData, LogIndex, ServerId};
use crate::error::{ErrorKind, Result};

/// A server's role within a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Counts toward quorums and may become a candidate.
    Voter,
    /// Receives replicated entries but never votes; typically a read replica.
    Standby,
    /// Receives nothing yet; present only while catching up to be promoted.
    Spare,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: ServerId,
    pub address: String,
    pub role: Role,
}

/// The ordered roster of servers in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Configuration {
    servers: Vec<ServerInfo>,
}

impl Configuration {
    pub fn new() -> Self {
        Configuration { servers: Vec::new() }
    }

    pub fn single(id: ServerId, address: impl Into<String>) -> Self {
        Configuration {
            servers: vec![ServerInfo {
                id,
                address: address.into(),
                role: Role::Voter,
            }],
        }
    }

    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    pub fn get(&self, id: ServerId) -> Option<&ServerInfo> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: ServerId) -> bool {
        self.get(id).is_some()
    }

    pub fn voters(&self) -> impl Iterator<Item = &ServerInfo> {
        self.servers.iter().filter(|s| s.role == Role::Voter)
    }

    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    /// Strict majority of voters; always at least 1 so an empty
    /// configuration can never trivially satisfy a quorum check.
    pub fn quorum_size(&self) -> usize {
        let voters = self.voter_count();
        if voters == 0 {
            return usize::MAX;
        }
        voters / 2 + 1
    }

    pub fn upsert(&mut self, id: ServerId, address: impl Into<String>, role: Role) {
        if let Some(existing) = self.servers.iter_mut().find(|s| s.id == id) {
            existing.address = address.into();
            existing.role = role;
        } else {
            self.servers.push(ServerInfo {
                id,
                address: address.into(),
                role,
            });
        }
    }

    pub fn remove(&mut self, id: ServerId) {
        self.servers.retain(|s| s.id != id);
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Configuration is always serializable")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ErrorKind::ConfigurationInvalid(e.to_string()).into())
    }

    /// Servers present in `other` but absent (or with a different role) here.
    pub fn diff<'a>(&self, other: &'a Configuration) -> Vec<&'a ServerInfo> {
        other
            .servers
            .iter()
            .filter(|s| self.get(s.id).map(|cur| cur.role) != Some(s.role))
            .collect()
    }
}

/// An in-flight or resolved configuration change tracked against the log.
struct PendingChange {
    index: LogIndex,
    previous: Configuration,
}

/// Tracks which [`Configuration`] is currently in effect, alongside the
/// commit bookkeeping needed to know whether it is safe from rollback.
///
/// A configuration entry takes effect for quorum-counting purposes the
/// instant it is appended (the joint-free single-server change rule), but
/// is only durably safe once `commit` has advanced past its index; until
/// then `revert` can undo it if the entry is truncated away by a
/// conflicting leader.
pub struct ConfigurationState {
    pub value: Configuration,
    pending: Option<PendingChange>,
    committed_index: LogIndex,
    last_snapshot_index: LogIndex,
}

impl ConfigurationState {
    pub fn new(value: Configuration) -> Self {
        ConfigurationState {
            value,
            pending: None,
            committed_index: 0,
            last_snapshot_index: 0,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn committed_index(&self) -> LogIndex {
        self.committed_index
    }

    pub fn uncommitted_index(&self) -> Option<LogIndex> {
        self.pending.as_ref().map(|p| p.index)
    }

    pub fn last_snapshot_index(&self) -> LogIndex {
        self.last_snapshot_index
    }

    /// Applies `entry` immediately if it is a configuration change,
    /// recording the prior value so it can be reverted if later truncated.
    pub fn apply(&mut self, entry: &Entry, commit_index: LogIndex) {
        if let EntryData::Configuration(ref new_value) = entry.data {
            if entry.index <= commit_index {
                self.committed_index = entry.index;
                self.pending = None;
            } else {
                self.pending = Some(PendingChange {
                    index: entry.index,
                    previous: self.value.clone(),
                });
            }
            self.value = new_value.clone();
        }
    }

    /// Called whenever the commit index advances; resolves a pending
    /// change if its index is now committed. Returns true if something
    /// changed (so the caller can mark its Update as config-dirty).
    pub fn commit(&mut self, commit_index: LogIndex) -> bool {
        if let Some(p) = &self.pending {
            if p.index <= commit_index {
                self.committed_index = p.index;
                self.pending = None;
                return true;
            }
        }
        false
    }

    /// Called when the log is truncated at `from_index`; undoes an
    /// in-flight configuration change if it is being dropped.
    pub fn revert(&mut self, from_index: LogIndex) {
        if let Some(p) = &self.pending {
            if p.index >= from_index {
                self.value = p.previous.clone();
                self.pending = None;
            }
        }
    }

    pub fn restore_from_snapshot(&mut self, value: Configuration, index: LogIndex) {
        self.value = value;
        self.committed_index = index;
        self.last_snapshot_index = index;
        self.pending = None;
    }
}
