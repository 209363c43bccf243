//! Log entries: the three kinds of payload a replicated log index can
//! carry (command, configuration change, barrier).

use std::sync::Arc;

use crate::configuration::Configuration;

pub type ServerId = u64;
pub type Term = u64;
pub type LogIndex = u64;

/// Groups entries that were appended to the log together (e.g. from a
/// single `Submit` event), so their payload storage can be released as one
/// unit once every entry in the group has been compacted away. Cloning an
/// `Entry` bumps the batch's refcount; dropping the last clone frees it.
pub type Batch = Arc<Vec<u8>>;

/// The payload carried by a single log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryData {
    /// An opaque application command.
    Command(Batch),
    /// A membership change, encoded with [`crate::configuration::Configuration::encode`].
    Configuration(Configuration),
    /// A zero-payload entry a new leader appends in its own term so that
    /// commit can advance past prior-term entries.
    Barrier,
}

/// A single entry in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub index: LogIndex,
    pub term: Term,
    pub data: EntryData,
}

impl Entry {
    pub fn barrier(index: LogIndex, term: Term) -> Self {
        Entry {
            index,
            term,
            data: EntryData::Barrier,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.data, EntryData::Configuration(_))
    }
}

/// The position (index, term) an entry occupies, used to track the fate of
/// a proposal after it is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    pub index: LogIndex,
    pub term: Term,
}
