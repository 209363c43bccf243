//! In-memory replicated log: a contiguous, gapless run of entries plus the
//! metadata of whatever has already been compacted into a snapshot.
//!
//! Entries live in a plain `VecDeque` — itself a ring buffer — indexed by
//! log index rather than by position, so lookups don't need to track a
//! separate base offset by hand.

use std::collections::VecDeque;

use crate::entry::{Entry, LogIndex, Term};
use crate::error::{ErrorKind, Result};

/// The replicated log. Indices are dense and 1-based; `snapshot_index`
/// covers everything at or below it that has been compacted away.
#[derive(Debug, Default)]
pub struct Log {
    entries: VecDeque<Entry>,
    snapshot_index: LogIndex,
    snapshot_term: Term,
}

impl Log {
    pub fn new() -> Self {
        Log {
            entries: VecDeque::new(),
            snapshot_index: 0,
            snapshot_term: 0,
        }
    }

    /// Resets the log to empty, pinned at a snapshot covering `(index, term)`.
    pub fn restore(&mut self, index: LogIndex, term: Term) {
        self.entries.clear();
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot_index
    }

    pub fn snapshot_term(&self) -> Term {
        self.snapshot_term
    }

    /// Lowest index still retained in memory (i.e. not yet compacted away).
    pub fn first_index(&self) -> LogIndex {
        match self.entries.front() {
            Some(e) => e.index,
            None => self.snapshot_index + 1,
        }
    }

    pub fn last_index(&self) -> LogIndex {
        match self.entries.back() {
            Some(e) => e.index,
            None => self.snapshot_index,
        }
    }

    pub fn last_term(&self) -> Term {
        match self.entries.back() {
            Some(e) => e.term,
            None => self.snapshot_term,
        }
    }

    fn position_of(&self, index: LogIndex) -> Option<usize> {
        let first = self.first_index();
        if index < first || self.entries.is_empty() {
            return None;
        }
        let offset = index - first;
        if (offset as usize) < self.entries.len() {
            Some(offset as usize)
        } else {
            None
        }
    }

    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        self.position_of(index).map(|pos| &self.entries[pos])
    }

    /// Term of `index`, including the term covered by the snapshot.
    pub fn term_of(&self, index: LogIndex) -> Option<Term> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        if index == 0 {
            return Some(0);
        }
        self.get(index).map(|e| e.term)
    }

    /// Whether `index` is covered by the snapshot and no longer retained.
    pub fn is_compacted(&self, index: LogIndex) -> bool {
        index != 0 && index < self.first_index()
    }

    /// Appends `entries`, which must immediately follow `last_index()` with
    /// strictly monotonic indices.
    pub fn append(&mut self, entries: Vec<Entry>) -> Result<()> {
        let mut expected = self.last_index() + 1;
        for entry in &entries {
            if entry.index != expected {
                return Err(ErrorKind::BadParam(format!(
                    "append expected index {} but got {}",
                    expected, entry.index
                ))
                .into());
            }
            expected += 1;
        }
        self.entries.extend(entries);
        Ok(())
    }

    /// Drops every entry at or after `from_index`. Refuses to drop an
    /// already-committed entry.
    pub fn truncate(&mut self, from_index: LogIndex, commit_index: LogIndex) -> Result<()> {
        if from_index <= commit_index {
            return Err(ErrorKind::BadParam(format!(
                "refusing to truncate committed entry {} (commit_index={})",
                from_index, commit_index
            ))
            .into());
        }
        if from_index <= self.first_index() {
            self.entries.clear();
            return Ok(());
        }
        if let Some(pos) = self.position_of(from_index) {
            self.entries.truncate(pos);
        }
        Ok(())
    }

    /// Discards entries at or below `index - trailing`, retaining
    /// `trailing` entries behind the new snapshot boundary for fast
    /// follower resync.
    pub fn compact(&mut self, index: LogIndex, trailing: u64) -> Result<()> {
        if index > self.last_index() {
            return Err(ErrorKind::BadParam(format!(
                "cannot snapshot at {} past last_index {}",
                index,
                self.last_index()
            ))
            .into());
        }
        let boundary = index.saturating_sub(trailing);
        if boundary <= self.snapshot_index {
            return Ok(());
        }
        let term = self
            .term_of(boundary)
            .expect("boundary must be within the log or at the current snapshot");
        while matches!(self.entries.front(), Some(e) if e.index <= boundary) {
            self.entries.pop_front();
        }
        self.snapshot_index = boundary;
        self.snapshot_term = term;
        Ok(())
    }

    pub fn is_density_ok(&self) -> bool {
        self.first_index() <= self.last_index() + 1
    }
}
