//! The user store: the external source of truth for who may log in,
//! with what password, and who has been kicked. `IUserStore` is the
//! seam a deployment overrides (a real database, an LDAP lookup, …);
//! `InMemoryUserStore` is the reference implementation, keyed the same
//! way the underlying row types are: `(classId, userId)` for a user
//! record, `(classId, userId, instId)` for a pending kick.

use crate::rtp::collections::{hash_map, HashMap};
use crate::rtp::crypto::hash::Digest;
use crate::rtp::identity::User;
use crate::rtp::sync::RwLock;

/// One row of the user table: the durable facts about an identity
/// independent of whether it's currently connected.
#[derive(Clone, Debug)]
pub struct UserRow {
    pub class_id: u8,
    pub user_id: u64,
    /// Maximum number of simultaneous `instId`s this user may hold.
    pub max_inst_ids: u16,
    /// `true` for a C2S relay identity rather than an end-user one.
    pub is_c2s: bool,
    pub password_hash: Digest,
    /// Last IP this identity was observed to bind from, if the
    /// deployment restricts logins to a known address.
    pub bound_ip: Option<[u8; 4]>,
}

/// A pending kick: instructs the hub to drop a specific instance the
/// next time (or if) it's online.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PendingKick {
    pub class_id: u8,
    pub user_id: u64,
    pub inst_id: u16,
}

/// The seam between the router and whatever durably tracks identities.
pub trait IUserStore: Send + Sync {
    /// Looks up the durable row for `(classId, userId)`, if any.
    fn lookup(&self, class_id: u8, user_id: u64) -> Option<UserRow>;

    /// Records that `user` is now online, for presence-aware lookups.
    fn record_online(&self, user: User);

    /// Records that `user` has gone offline.
    fn record_offline(&self, user: User);

    /// Returns, and clears, any kicks pending for `user`.
    fn take_pending_kicks(&self, user: User) -> Vec<PendingKick>;

    /// Queues a kick to be delivered the next time the identity is (or
    /// currently is) online.
    fn queue_kick(&self, kick: PendingKick);
}

/// An in-process reference store, useful for tests and small
/// deployments that don't need a real database behind `IUserStore`.
pub struct InMemoryUserStore {
    rows: RwLock<HashMap<(u8, u64), UserRow>>,
    online: RwLock<HashMap<User, ()>>,
    kicks: RwLock<HashMap<(u8, u64, u16), PendingKick>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self { rows: RwLock::new(hash_map()), online: RwLock::new(hash_map()), kicks: RwLock::new(hash_map()) }
    }

    pub fn insert(&self, row: UserRow) {
        self.rows.write().insert((row.class_id, row.user_id), row);
    }

    pub fn is_online(&self, user: User) -> bool {
        self.online.read().contains_key(&user)
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IUserStore for InMemoryUserStore {
    fn lookup(&self, class_id: u8, user_id: u64) -> Option<UserRow> {
        self.rows.read().get(&(class_id, user_id)).cloned()
    }

    fn record_online(&self, user: User) {
        self.online.write().insert(user, ());
    }

    fn record_offline(&self, user: User) {
        self.online.write().remove(&user);
    }

    fn take_pending_kicks(&self, user: User) -> Vec<PendingKick> {
        let mut kicks = self.kicks.write();
        let key = (user.class_id(), user.user_id(), user.inst_id());
        kicks.remove(&key).into_iter().collect()
    }

    fn queue_kick(&self, kick: PendingKick) {
        self.kicks.write().insert((kick.class_id, kick.user_id, kick.inst_id), kick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_reflects_inserted_row() {
        let store = InMemoryUserStore::new();
        store.insert(UserRow {
            class_id: 2,
            user_id: 100,
            max_inst_ids: 1,
            is_c2s: false,
            password_hash: Digest::compute(b"nonce", b"pw"),
            bound_ip: None,
        });
        assert!(store.lookup(2, 100).is_some());
        assert!(store.lookup(2, 101).is_none());
    }

    #[test]
    fn kicks_are_taken_once() {
        let store = InMemoryUserStore::new();
        let user = User::new(2, 100, 0).unwrap();
        store.queue_kick(PendingKick { class_id: 2, user_id: 100, inst_id: 0 });
        assert_eq!(store.take_pending_kicks(user).len(), 1);
        assert_eq!(store.take_pending_kicks(user).len(), 0);
    }

    #[test]
    fn online_presence_round_trips() {
        let store = InMemoryUserStore::new();
        let user = User::new(2, 100, 0).unwrap();
        store.record_online(user);
        assert!(store.is_online(user));
        store.record_offline(user);
        assert!(!store.is_online(user));
    }
}
