//! Append-only log of accepted scene commands.
//!
//! Indices are absolute: pruning advances `base` but never renumbers, so a
//! session cursor stays valid across prunes.
//!
//! ```text
//!  base                         len()
//!   │  retained commands          │
//!   ▼                             ▼
//!   ┌────┬────┬────┬────┬────┬────┐
//!   │ c5 │ c6 │ c7 │ c8 │ c9 │ .. │   cursors of live sessions are in [base, len]
//!   └────┴────┴────┴────┴────┴────┘
//! ```
//!
//! Every append publishes the new tail on a `watch` channel, which is how idle
//! sessions learn there is something to send.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;

use crate::command::{Command, CommandBody, ResourceCommand};
use crate::ids::UserId;
use crate::protocol::MAX_COMMANDS_PER_PACKET;

/// Default number of passed commands kept before pruning kicks in.
pub const DEFAULT_HISTORIC_RETENTION: usize = 4096;

/// Commands selected for one outgoing packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    pub commands: Vec<Arc<Command>>,
    /// Cursor position after this batch, including skipped commands.
    pub next: u64,
}

/// The server's totally ordered command log.
#[derive(Debug)]
pub struct CommandsHistoric {
    commands: VecDeque<Arc<Command>>,
    base: u64,
    retention: usize,
    tail_tx: watch::Sender<u64>,
}

impl CommandsHistoric {
    pub fn new(retention: usize) -> Self {
        let (tail_tx, _) = watch::channel(0);
        Self {
            commands: VecDeque::new(),
            base: 0,
            retention,
            tail_tx,
        }
    }

    /// Append a command and return its absolute index.
    pub fn add_command(&mut self, command: Command) -> u64 {
        let index = self.len();
        log::trace!(
            "historic[{index}] user {} {}",
            command.user_id,
            command.subtype_name()
        );
        self.commands.push_back(Arc::new(command));
        self.tail_tx.send_replace(self.len());
        index
    }

    pub fn add_commands(&mut self, commands: impl IntoIterator<Item = Command>) {
        for command in commands {
            self.add_command(command);
        }
    }

    /// Absolute index one past the last command.
    pub fn len(&self) -> u64 {
        self.base + self.commands.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute index of the oldest retained command.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Number of commands still held in memory.
    pub fn retained(&self) -> usize {
        self.commands.len()
    }

    /// Whether the log no longer starts at the scene's first command.
    pub fn has_pruned(&self) -> bool {
        self.base > 0
    }

    pub fn get(&self, index: u64) -> Option<&Arc<Command>> {
        let offset = index.checked_sub(self.base)?;
        self.commands.get(usize::try_from(offset).ok()?)
    }

    /// Receiver woken with the new tail after every append.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tail_tx.subscribe()
    }

    /// Collect up to `max_count` commands for `user`, starting at `first`.
    ///
    /// Commands the user must not see are skipped but still consumed, so
    /// `next` may run ahead of `first + commands.len()`.
    pub fn fill_update_packet(&self, first: u64, max_count: usize, user: UserId) -> UpdateBatch {
        let max_count = max_count.min(MAX_COMMANDS_PER_PACKET);
        let mut index = if first < self.base {
            log::warn!(
                "cursor {first} of user {user} is behind historic base {}",
                self.base
            );
            self.base
        } else {
            first
        };

        let mut commands = Vec::with_capacity(max_count);
        while commands.len() < max_count {
            let Some(command) = self.get(index) else {
                break;
            };
            if must_send_command_to_user(command, user) {
                commands.push(Arc::clone(command));
            }
            index += 1;
        }

        UpdateBatch {
            commands,
            next: index.min(self.len()),
        }
    }

    /// Drop commands every session has passed, once enough have piled up.
    ///
    /// Returns how many commands were dropped.
    pub fn prune(&mut self, min_cursor: u64) -> usize {
        let min_cursor = min_cursor.min(self.len());
        let behind = min_cursor.saturating_sub(self.base) as usize;
        if behind <= self.retention {
            return 0;
        }
        self.commands.drain(..behind);
        self.base = min_cursor;
        log::debug!("historic pruned {behind} commands, base now {}", self.base);
        behind
    }
}

impl Default for CommandsHistoric {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORIC_RETENTION)
    }
}

/// Response commands are private to the user they answer.
pub fn must_send_command_to_user(command: &Command, user: UserId) -> bool {
    match &command.body {
        CommandBody::Resource(ResourceCommand::LockDenial { .. })
        | CommandBody::Resource(ResourceCommand::Rejection { .. }) => {
            command.response_scope() == Some(user)
        }
        _ => true,
    }
}
