use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::command::Command;
use crate::lock;

/// A command that has been sent and is waiting for its acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub command: Command,
    pub sequence: u8,
    pub sent_at: Instant,
    pub deadline: Instant,
}

impl PendingCommand {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Commands in flight, keyed by sequence number.
///
/// Shared by the sender (insert), the listener (remove on acknowledgement) and the sweeper
/// (remove on expiry).  Every access goes through one lock.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<u8, PendingCommand>>,
}

impl PendingTable {
    pub fn new() -> PendingTable {
        PendingTable::default()
    }

    /// Records a sent command.  Returns whatever was previously recorded under the same sequence
    /// number.
    pub fn insert(&self, entry: PendingCommand) -> Option<PendingCommand> {
        lock(&self.entries).insert(entry.sequence, entry)
    }

    /// Removes and returns the command waiting on `sequence`, if there is one.
    pub fn resolve(&self, sequence: u8) -> Option<PendingCommand> {
        lock(&self.entries).remove(&sequence)
    }

    /// Removes and returns every command whose deadline is at or before `now`.
    pub fn take_expired(&self, now: Instant) -> Vec<PendingCommand> {
        let mut expired = Vec::new();
        lock(&self.entries).retain(|_, entry| {
            if entry.is_expired(now) {
                expired.push(entry.clone());
                false
            } else {
                true
            }
        });
        expired.sort_by_key(|e| e.deadline);
        expired
    }

    pub fn contains(&self, sequence: u8) -> bool {
        lock(&self.entries).contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
