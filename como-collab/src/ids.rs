//! User and resource identity.
//!
//! A resource is identified by the pair `(creator_id, index)`:
//!
//! ```text
//! ┌──────────────┬────────────────┐
//! │ creator_id   │ index          │
//! │ u16 (UserId) │ u32            │
//! └──────────────┴────────────────┘
//! ```
//!
//! The creator component partitions the index space, so every client can
//! reserve ids locally without a round trip. The server only has to check
//! that each creator keeps moving forward.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::scene::SceneError;

/// Identifier of a connected user. `NO_USER` stands for the server itself.
pub type UserId = u16;

/// Reserved user id: the server, or "nobody" when used as an owner.
pub const NO_USER: UserId = 0;

/// Globally unique resource identifier.
///
/// Ordered by creator first, then index, so it can key ordered maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub creator_id: UserId,
    pub index: u32,
}

/// The null resource id. Never handed out by a generator.
pub const NO_RESOURCE: ResourceId = ResourceId {
    creator_id: NO_USER,
    index: 0,
};

impl ResourceId {
    pub const fn new(creator_id: UserId, index: u32) -> Self {
        Self { creator_id, index }
    }

    /// Id `n` slots after this one within the same reserved block.
    /// The id `n` slots after this one, saturating at the end of the
    /// creator's index space.
    pub fn offset(&self, n: u32) -> Self {
        Self {
            creator_id: self.creator_id,
            index: self.index.saturating_add(n),
        }
    }

    /// The id `n` slots after this one, or `None` past `u32::MAX`.
    pub fn checked_offset(&self, n: u32) -> Option<Self> {
        self.index.checked_add(n).map(|index| Self {
            creator_id: self.creator_id,
            index,
        })
    }

    pub fn is_null(&self) -> bool {
        *self == NO_RESOURCE
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.creator_id, self.index)
    }
}

/// Local allocator of resource ids for a single creator.
///
/// Indices start at 1 and are never reused. Reservation never fails.
#[derive(Debug, Clone)]
pub struct ResourceIdsGenerator {
    creator_id: UserId,
    next_index: u32,
}

impl ResourceIdsGenerator {
    pub fn new(creator_id: UserId) -> Self {
        Self {
            creator_id,
            next_index: 1,
        }
    }

    /// Reserve `count` consecutive ids and return the first one.
    ///
    /// Reserving zero ids returns the next id without consuming it.
    pub fn reserve_resource_ids(&mut self, count: u32) -> ResourceId {
        let first = ResourceId::new(self.creator_id, self.next_index);
        self.next_index = self.next_index.saturating_add(count);
        first
    }

    pub fn creator_id(&self) -> UserId {
        self.creator_id
    }

    /// Index the next reservation will start at.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }
}

/// Server-side verifier for optimistic client allocations.
///
/// Tracks the highest index accepted per creator; a creation command must
/// come from the creator itself and use strictly higher indices.
#[derive(Debug, Default)]
pub struct ResourceIdsRegistry {
    highest: HashMap<UserId, u32>,
}

impl ResourceIdsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `ids` may be claimed by `user`, without recording them.
    pub fn check(&self, user: UserId, ids: &[ResourceId]) -> Result<(), SceneError> {
        let mut floor = self.highest.get(&user).copied().unwrap_or(0);
        let mut sorted: Vec<ResourceId> = ids.to_vec();
        sorted.sort();
        for id in sorted {
            if id.creator_id != user || id.index <= floor {
                return Err(SceneError::DuplicateResourceId(id));
            }
            floor = id.index;
        }
        Ok(())
    }

    /// Verify and record `ids` for `user`.
    pub fn claim(&mut self, user: UserId, ids: &[ResourceId]) -> Result<(), SceneError> {
        self.check(user, ids)?;
        if let Some(max) = ids.iter().map(|id| id.index).max() {
            self.highest.insert(user, max);
        }
        Ok(())
    }

    /// Highest index accepted so far for `creator`.
    pub fn highest_index(&self, creator: UserId) -> u32 {
        self.highest.get(&creator).copied().unwrap_or(0)
    }
}
