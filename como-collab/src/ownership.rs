//! Resource ownership table.
//!
//! Every shared resource is either unowned or owned by exactly one user.
//! Resources form a forest: a mesh owns its materials and texture walls,
//! a category owns its primitives. Locking and deleting act on whole
//! subtrees.
//!
//! ```text
//!   mesh (1,1) ─────┬── material (1,2)
//!   owner: 7        ├── material (1,3)
//!                   └── wall     (1,4)
//! ```
//!
//! The table is an arena keyed by `ResourceId`; parent and children links
//! are ids, never references.

use std::collections::{BTreeMap, BTreeSet};

use crate::command::ResourceKind;
use crate::ids::{ResourceId, UserId, NO_USER};
use crate::scene::SceneError;

/// One entry in the ownership arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    /// `NO_USER` while unowned
    pub owner: UserId,
    pub parent: Option<ResourceId>,
    pub children: Vec<ResourceId>,
}

/// Result of a lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The resource and these descendants now belong to the requester.
    Granted(Vec<ResourceId>),
    Denied,
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

#[derive(Debug, Default)]
pub struct OwnershipTable {
    records: BTreeMap<ResourceId, ResourceRecord>,
}

impl OwnershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new resource, linked under `parent` if given.
    ///
    /// A child starts with its parent's owner, so a locked subtree stays
    /// whole. Roots start unowned.
    pub fn insert(
        &mut self,
        id: ResourceId,
        kind: ResourceKind,
        parent: Option<ResourceId>,
    ) -> Result<(), SceneError> {
        if self.records.contains_key(&id) {
            return Err(SceneError::DuplicateResourceId(id));
        }
        let mut owner = NO_USER;
        if let Some(parent_id) = parent {
            let parent_record = self
                .records
                .get_mut(&parent_id)
                .ok_or(SceneError::UnknownResource(parent_id))?;
            parent_record.children.push(id);
            owner = parent_record.owner;
        }
        self.records.insert(
            id,
            ResourceRecord {
                kind,
                owner,
                parent,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// `id` followed by all its descendants, depth first.
    pub fn subtree(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(record) = self.records.get(&current) else {
                continue;
            };
            out.push(current);
            stack.extend(record.children.iter().rev().copied());
        }
        out
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: ResourceId) -> impl Iterator<Item = ResourceId> + '_ {
        std::iter::successors(self.records.get(&id).and_then(|r| r.parent), move |current| {
            self.records.get(current).and_then(|r| r.parent)
        })
    }

    /// Try to give `user` the resource and its whole subtree.
    ///
    /// Denied when any descendant or ancestor belongs to someone else.
    pub fn lock(&mut self, id: ResourceId, user: UserId) -> LockOutcome {
        if !self.records.contains_key(&id) {
            return LockOutcome::Denied;
        }
        let subtree = self.subtree(id);
        let contended = self.ancestors(id).chain(subtree.iter().copied()).any(|rid| {
            self.records
                .get(&rid)
                .is_some_and(|r| r.owner != NO_USER && r.owner != user)
        });
        if contended {
            log::debug!("lock on {id} denied to user {user}");
            return LockOutcome::Denied;
        }
        for rid in &subtree {
            if let Some(record) = self.records.get_mut(rid) {
                record.owner = user;
            }
        }
        LockOutcome::Granted(subtree)
    }

    /// Release everything `user` owns. Returns the released ids.
    pub fn unlock_user(&mut self, user: UserId) -> Vec<ResourceId> {
        let mut released = Vec::new();
        for (id, record) in self.records.iter_mut() {
            if user != NO_USER && record.owner == user {
                record.owner = NO_USER;
                released.push(*id);
            }
        }
        released
    }

    /// Locks of a disconnecting user go back to the pool.
    pub fn release_user(&mut self, user: UserId) -> Vec<ResourceId> {
        self.unlock_user(user)
    }

    /// Delete everything `user` owns, cascading to descendants.
    pub fn delete_user_selection(&mut self, user: UserId) -> Vec<ResourceId> {
        let mut doomed = BTreeSet::new();
        let mut ordered = Vec::new();
        for root in self.owned_by(user) {
            for id in self.subtree(root) {
                if doomed.insert(id) {
                    ordered.push(id);
                }
            }
        }

        for id in &ordered {
            let Some(record) = self.records.remove(id) else {
                continue;
            };
            if let Some(parent_id) = record.parent {
                if !doomed.contains(&parent_id) {
                    if let Some(parent) = self.records.get_mut(&parent_id) {
                        parent.children.retain(|child| child != id);
                    }
                }
            }
        }
        ordered
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.records.contains_key(&id)
    }

    /// Current owner, `None` if unowned or unknown.
    pub fn owner(&self, id: ResourceId) -> Option<UserId> {
        self.records
            .get(&id)
            .map(|r| r.owner)
            .filter(|owner| *owner != NO_USER)
    }

    pub fn is_owned_by(&self, id: ResourceId, user: UserId) -> bool {
        user != NO_USER && self.owner(id) == Some(user)
    }

    pub fn owned_by(&self, user: UserId) -> Vec<ResourceId> {
        if user == NO_USER {
            return Vec::new();
        }
        self.records
            .iter()
            .filter(|(_, r)| r.owner == user)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn count_of(&self, kind: ResourceKind) -> usize {
        self.records.values().filter(|r| r.kind == kind).count()
    }

    /// All owned resources with their owners, in id order.
    pub fn owned(&self) -> impl Iterator<Item = (ResourceId, UserId)> + '_ {
        self.records
            .iter()
            .filter(|(_, r)| r.owner != NO_USER)
            .map(|(id, r)| (*id, r.owner))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_with_materials(table: &mut OwnershipTable, creator: UserId) -> ResourceId {
        let mesh = ResourceId::new(creator, 1);
        table.insert(mesh, ResourceKind::Mesh, None).unwrap();
        for i in 2..=4 {
            table
                .insert(ResourceId::new(creator, i), ResourceKind::Material, Some(mesh))
                .unwrap();
        }
        mesh
    }

    #[test]
    fn test_insert_requires_parent() {
        let mut table = OwnershipTable::new();
        let err = table
            .insert(ResourceId::new(1, 2), ResourceKind::Material, Some(ResourceId::new(1, 1)))
            .unwrap_err();
        assert!(matches!(err, SceneError::UnknownResource(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_new_resources_are_unowned() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);
        assert_eq!(table.owner(mesh), None);
        assert!(table.contains(mesh));
        assert_eq!(table.count_of(ResourceKind::Material), 3);
    }

    #[test]
    fn test_lock_takes_subtree() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);

        let outcome = table.lock(mesh, 7);
        assert_eq!(
            outcome,
            LockOutcome::Granted(vec![
                mesh,
                ResourceId::new(1, 2),
                ResourceId::new(1, 3),
                ResourceId::new(1, 4)
            ])
        );
        assert!(table.is_owned_by(ResourceId::new(1, 3), 7));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);

        assert!(table.lock(mesh, 7).is_granted());
        assert_eq!(table.lock(mesh, 9), LockOutcome::Denied);
        assert_eq!(table.lock(ResourceId::new(1, 2), 9), LockOutcome::Denied);
        // Relocking one's own resource is fine.
        assert!(table.lock(mesh, 7).is_granted());
        assert_eq!(table.owner(mesh), Some(7));
    }

    #[test]
    fn test_lock_denied_when_descendant_taken() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);
        assert!(table.lock(ResourceId::new(1, 4), 9).is_granted());
        assert_eq!(table.lock(mesh, 7), LockOutcome::Denied);
        assert_eq!(table.owner(mesh), None);
    }

    #[test]
    fn test_lock_denied_when_ancestor_taken() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);
        assert!(table.lock(mesh, 7).is_granted());
        table.release_user(7);
        assert!(table.lock(mesh, 7).is_granted());

        assert_eq!(table.lock(ResourceId::new(1, 3), 9), LockOutcome::Denied);
        assert_eq!(table.owner(ResourceId::new(1, 3)), Some(7));
        assert_eq!(table.ancestors(ResourceId::new(1, 3)).collect::<Vec<_>>(), vec![mesh]);
    }

    #[test]
    fn test_child_inherits_parent_owner() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);
        table.lock(mesh, 7);

        let late = ResourceId::new(2, 1);
        table.insert(late, ResourceKind::Material, Some(mesh)).unwrap();
        assert_eq!(table.owner(late), Some(7));
        assert_eq!(table.lock(late, 9), LockOutcome::Denied);

        // The whole subtree goes with its owner's deletion.
        assert_eq!(table.delete_user_selection(7).len(), 5);
        assert!(!table.contains(late));
    }

    #[test]
    fn test_lock_unknown_is_denied() {
        let mut table = OwnershipTable::new();
        assert_eq!(table.lock(ResourceId::new(3, 3), 1), LockOutcome::Denied);
    }

    #[test]
    fn test_unlock_user_releases_only_theirs() {
        let mut table = OwnershipTable::new();
        let a = ResourceId::new(1, 1);
        let b = ResourceId::new(1, 2);
        table.insert(a, ResourceKind::Light, None).unwrap();
        table.insert(b, ResourceKind::Light, None).unwrap();
        table.lock(a, 7);
        table.lock(b, 9);

        assert_eq!(table.unlock_user(7), vec![a]);
        assert_eq!(table.owner(a), None);
        assert_eq!(table.owner(b), Some(9));
        assert!(table.unlock_user(NO_USER).is_empty());
    }

    #[test]
    fn test_cascading_delete() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);
        let other = ResourceId::new(1, 10);
        table.insert(other, ResourceKind::Camera, None).unwrap();
        table.lock(mesh, 7);

        let deleted = table.delete_user_selection(7);
        assert_eq!(deleted.len(), 4);
        assert!(!table.contains(mesh));
        assert_eq!(table.count_of(ResourceKind::Material), 0);
        assert!(table.contains(other));
    }

    #[test]
    fn test_delete_child_unlinks_from_parent() {
        let mut table = OwnershipTable::new();
        let mesh = mesh_with_materials(&mut table, 1);
        table.lock(ResourceId::new(1, 3), 9);

        assert_eq!(table.delete_user_selection(9), vec![ResourceId::new(1, 3)]);
        let children = &table.get(mesh).unwrap().children;
        assert_eq!(children, &vec![ResourceId::new(1, 2), ResourceId::new(1, 4)]);
    }

    #[test]
    fn test_release_after_disconnect() {
        let mut table = OwnershipTable::new();
        let id = ResourceId::new(7, 3);
        table.insert(id, ResourceKind::Mesh, None).unwrap();
        assert!(table.lock(id, 7).is_granted());
        table.release_user(7);
        assert!(table.lock(id, 9).is_granted());
    }
}
