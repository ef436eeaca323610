//! Session registry with per-user replication cursors.
//!
//! There is no per-message fan-out: every session pulls from the shared
//! commands historic at its own pace. The group only tracks who is
//! connected, where each one's cursor stands, and hands out receivers for
//! the historic's tail notifications.
//!
//! ```text
//!   historic ──watch(tail)──┬──► session 1  cursor 12
//!                           ├──► session 2  cursor  9   ◄── min_cursor()
//!                           └──► session 3  cursor 12
//! ```
//!
//! Cursor reads and stats updates are atomics, so the send path never takes
//! the registry lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use crate::command::Color;
use crate::ids::UserId;

/// How far one session has been replicated.
#[derive(Debug)]
pub struct ReplicationCursor {
    /// Absolute index of the next command to send
    next_command: AtomicU64,
    /// Absolute index of the last command actually written to the socket,
    /// `NOTHING_SENT` until the first one
    last_command_sent: AtomicU64,
}

const NOTHING_SENT: u64 = u64::MAX;

impl ReplicationCursor {
    pub fn new(start: u64) -> Self {
        Self {
            next_command: AtomicU64::new(start),
            last_command_sent: AtomicU64::new(NOTHING_SENT),
        }
    }

    pub fn next_command(&self) -> u64 {
        self.next_command.load(Ordering::Acquire)
    }

    /// Move the cursor to `next`; `sent_any` records the last delivered slot.
    pub fn advance(&self, next: u64, sent_any: bool) {
        if sent_any && next > 0 {
            self.last_command_sent.store(next - 1, Ordering::Release);
        }
        self.next_command.store(next, Ordering::Release);
    }

    /// Absolute index of the last command written, if any was.
    pub fn last_command_sent(&self) -> Option<u64> {
        let last = self.last_command_sent.load(Ordering::Acquire);
        (last != NOTHING_SENT).then_some(last)
    }

    /// True once every command up to `historic_len` has been handled.
    pub fn is_synchronized(&self, historic_len: u64) -> bool {
        self.next_command() == historic_len
    }
}

/// A connected user as other sessions see it.
#[derive(Debug, Clone)]
pub struct PublicUser {
    pub user_id: UserId,
    pub name: String,
    pub selection_color: Color,
    pub cursor: Arc<ReplicationCursor>,
}

impl PublicUser {
    pub fn new(user_id: UserId, name: impl Into<String>, selection_color: Color, start: u64) -> Self {
        Self {
            user_id,
            name: name.into(),
            selection_color,
            cursor: Arc::new(ReplicationCursor::new(start)),
        }
    }
}

/// Statistics for monitoring replication health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub packets_sent: u64,
    pub commands_sent: u64,
    pub active_users: usize,
}

struct AtomicBroadcastStats {
    packets_sent: AtomicU64,
    commands_sent: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            packets_sent: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
        }
    }
}

/// All sessions replicating one scene.
pub struct BroadcastGroup {
    users: Arc<RwLock<HashMap<UserId, PublicUser>>>,

    /// Tail notifications from the historic
    tail: watch::Receiver<u64>,

    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    pub fn new(tail: watch::Receiver<u64>) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            tail,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Register a session. Returns its tail receiver.
    pub async fn add_user(&self, user: PublicUser) -> watch::Receiver<u64> {
        let mut users = self.users.write().await;
        users.insert(user.user_id, user);
        self.subscribe()
    }

    pub async fn remove_user(&self, user_id: UserId) -> Option<PublicUser> {
        let mut users = self.users.write().await;
        users.remove(&user_id)
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn users(&self) -> Vec<PublicUser> {
        self.users.read().await.values().cloned().collect()
    }

    pub async fn has_user(&self, user_id: UserId) -> bool {
        self.users.read().await.contains_key(&user_id)
    }

    /// Lowest cursor across sessions, or `tail` when nobody is connected.
    pub async fn min_cursor(&self, tail: u64) -> u64 {
        self.users
            .read()
            .await
            .values()
            .map(|user| user.cursor.next_command())
            .min()
            .unwrap_or(tail)
    }

    /// Account for one packet sent by any session.
    pub fn record_packet(&self, n_commands: usize) {
        self.atomic_stats.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.atomic_stats
            .commands_sent
            .fetch_add(n_commands as u64, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> BroadcastStats {
        let users = self.users.read().await;
        BroadcastStats {
            packets_sent: self.atomic_stats.packets_sent.load(Ordering::Relaxed),
            commands_sent: self.atomic_stats.commands_sent.load(Ordering::Relaxed),
            active_users: users.len(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tail.clone()
    }
}
