//! Command queue: one in-flight command per desk and date.
//!
//! A second command for a held key is refused with
//! [`ErrorKind::AlreadyInProgress`] instead of being queued behind the first.
//! The key stays held until the engine records the terminal result of the
//! command that acquired it.

use chrono::{DateTime, NaiveDate, Utc};
use deskbook_core::model::{Command, CommandId, CommandKey, DeskId, ErrorKind};
use std::collections::HashMap;

/// A command holding its key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlight {
    /// Correlation id of the command
    pub id: CommandId,
    /// The command itself
    pub command: Command,
    /// When the key was acquired
    pub started_at: DateTime<Utc>,
}

/// Per-key locks for mutating commands
#[derive(Clone, Debug, Default)]
pub struct CommandQueue {
    in_flight: HashMap<CommandKey, InFlight>,
}

impl CommandQueue {
    /// Queue with no held keys
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the key of `command` for `id`
    ///
    /// # Errors
    ///
    /// [`ErrorKind::AlreadyInProgress`] if another command holds the key.
    pub fn try_acquire(
        &mut self,
        id: CommandId,
        command: Command,
        now: DateTime<Utc>,
    ) -> Result<(), ErrorKind> {
        let key = command.key();
        if let Some(holder) = self.in_flight.get(&key) {
            tracing::debug!(
                desk_id = %key.0,
                date = %key.1,
                holder = %holder.id,
                rejected = %id,
                "Command key already held"
            );
            return Err(ErrorKind::AlreadyInProgress);
        }

        self.in_flight.insert(
            key,
            InFlight {
                id,
                command,
                started_at: now,
            },
        );
        Ok(())
    }

    /// Frees `key` if `id` holds it
    ///
    /// Returns the released entry, or `None` when the key is free or held by
    /// another command.
    pub fn release(&mut self, key: CommandKey, id: CommandId) -> Option<InFlight> {
        match self.in_flight.get(&key) {
            Some(holder) if holder.id == id => self.in_flight.remove(&key),
            _ => None,
        }
    }

    /// Whether a command holds `key`
    #[must_use]
    pub fn is_locked(&self, key: CommandKey) -> bool {
        self.in_flight.contains_key(&key)
    }

    /// Whether a command for the desk on `date` is in flight
    #[must_use]
    pub fn is_pending(&self, desk_id: DeskId, date: NaiveDate) -> bool {
        self.is_locked((desk_id, date))
    }

    /// The command holding `key`
    #[must_use]
    pub fn holder(&self, key: CommandKey) -> Option<&InFlight> {
        self.in_flight.get(&key)
    }

    /// Number of held keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether no key is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
