//! Host-owned store of replicated player state
//!
//! The registry maps each player identity to its [`PlayerRecord`]. It is
//! constructed by the host session and passed down explicitly; there is no
//! ambient global instance. Mutation is refused on any process that does not
//! hold host authority, so an observer that builds a registry by mistake can
//! read it but never write it.

use log::info;
use shared::{
    Authority, ConnectionId, EntityRef, NetError, NetResult, PlayerId, PlayerSnapshot, Vec3,
    MAX_HEALTH,
};
use std::collections::BTreeMap;

/// Replicated combat state of one player
///
/// `health`, `kills` and `deaths` are the replicated fields. `entity` points
/// at the scene-owned body and `owner` is only used to address targeted calls
/// and ownership checks.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    /// May dip to zero or below between a lethal hit and the death transition
    pub health: i32,
    pub kills: u32,
    pub deaths: u32,
    pub entity: EntityRef,
    pub owner: ConnectionId,
}

impl PlayerRecord {
    /// Creates a fresh record at full health with clean counters
    pub fn new(entity: EntityRef, owner: ConnectionId) -> Self {
        Self {
            health: MAX_HEALTH,
            kills: 0,
            deaths: 0,
            entity,
            owner,
        }
    }

    pub fn snapshot(&self, id: PlayerId, position: Vec3, forward: Vec3) -> PlayerSnapshot {
        PlayerSnapshot {
            id,
            owner: self.owner,
            entity: self.entity,
            health: self.health,
            kills: self.kills,
            deaths: self.deaths,
            position,
            forward,
        }
    }
}

pub struct EntityRegistry {
    authority: Authority,
    records: BTreeMap<PlayerId, PlayerRecord>,
    /// Next identity handed out by `issue_id`
    next_id: u32,
}

impl EntityRegistry {
    /// Creates an empty registry for a process with the given authority
    ///
    /// Identities start from 1 and are never reused.
    pub fn new(authority: Authority) -> Self {
        Self {
            authority,
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Hands out the next unused player identity
    pub fn issue_id(&mut self) -> PlayerId {
        let id = PlayerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds a record under `id`
    ///
    /// Registering an identity twice is refused and leaves the existing record
    /// untouched.
    pub fn register(&mut self, id: PlayerId, record: PlayerRecord) -> NetResult<()> {
        self.require_host("register")?;

        if self.records.contains_key(&id) {
            return Err(NetError::AlreadyRegistered(id));
        }

        info!(
            "Registered {} ({} owned by {})",
            id, record.entity, record.owner
        );
        self.records.insert(id, record);
        // Keep issued ids ahead of anything registered with an explicit id
        self.next_id = self.next_id.max(id.0 + 1);
        Ok(())
    }

    /// Issues an identity and registers a fresh record under it in one step
    pub fn register_new(&mut self, entity: EntityRef, owner: ConnectionId) -> NetResult<PlayerId> {
        self.require_host("register")?;
        let id = self.issue_id();
        self.register(id, PlayerRecord::new(entity, owner))?;
        Ok(id)
    }

    pub fn get(&self, id: PlayerId) -> NetResult<&PlayerRecord> {
        self.records.get(&id).ok_or(NetError::NotFound(id))
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.records.contains_key(&id)
    }

    /// Applies `update` to the record under `id` and returns its result
    ///
    /// Only the host may mutate; anywhere else this is an authority violation
    /// and the record is left untouched.
    pub fn mutate<R>(
        &mut self,
        id: PlayerId,
        update: impl FnOnce(&mut PlayerRecord) -> R,
    ) -> NetResult<R> {
        self.require_host("mutate")?;
        let record = self.records.get_mut(&id).ok_or(NetError::NotFound(id))?;
        Ok(update(record))
    }

    /// Drops the record of a departed player
    pub fn remove(&mut self, id: PlayerId) -> NetResult<PlayerRecord> {
        self.require_host("remove")?;
        let record = self.records.remove(&id).ok_or(NetError::NotFound(id))?;
        info!("Removed {} ({})", id, record.entity);
        Ok(record)
    }

    pub fn find_by_owner(&self, owner: ConnectionId) -> Option<PlayerId> {
        self.records
            .iter()
            .find(|(_, record)| record.owner == owner)
            .map(|(id, _)| *id)
    }

    pub fn find_by_entity(&self, entity: EntityRef) -> Option<PlayerId> {
        self.records
            .iter()
            .find(|(_, record)| record.entity == entity)
            .map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, &PlayerRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn require_host(&self, operation: &str) -> NetResult<()> {
        if self.authority == Authority::Host {
            Ok(())
        } else {
            Err(NetError::AuthorityViolation {
                call: None,
                reason: format!("registry {} outside the host", operation),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_registry() -> EntityRegistry {
        EntityRegistry::new(Authority::Host)
    }

    #[test]
    fn test_record_starts_at_full_health() {
        let record = PlayerRecord::new(EntityRef(1), ConnectionId(1));
        assert_eq!(record.health, 100);
        assert_eq!(record.kills, 0);
        assert_eq!(record.deaths, 0);
    }

    #[test]
    fn test_issued_ids_are_monotonic() {
        let mut registry = host_registry();
        let a = registry.register_new(EntityRef(10), ConnectionId(1)).unwrap();
        let b = registry.register_new(EntityRef(11), ConnectionId(2)).unwrap();
        assert_eq!(a, PlayerId(1));
        assert_eq!(b, PlayerId(2));

        registry.remove(a).unwrap();
        let c = registry.register_new(EntityRef(12), ConnectionId(3)).unwrap();
        assert_eq!(c, PlayerId(3));
    }

    #[test]
    fn test_duplicate_register_is_refused() {
        let mut registry = host_registry();
        registry
            .register(PlayerId(5), PlayerRecord::new(EntityRef(1), ConnectionId(1)))
            .unwrap();

        let result =
            registry.register(PlayerId(5), PlayerRecord::new(EntityRef(2), ConnectionId(2)));
        assert_eq!(result, Err(NetError::AlreadyRegistered(PlayerId(5))));
        assert_eq!(registry.get(PlayerId(5)).unwrap().entity, EntityRef(1));

        // Explicit ids push the issuer forward
        assert_eq!(registry.issue_id(), PlayerId(6));
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = host_registry();
        assert_eq!(
            registry.get(PlayerId(9)).unwrap_err(),
            NetError::NotFound(PlayerId(9))
        );
    }

    #[test]
    fn test_mutate_on_host() {
        let mut registry = host_registry();
        let id = registry.register_new(EntityRef(1), ConnectionId(1)).unwrap();

        let health = registry
            .mutate(id, |record| {
                record.health -= 30;
                record.health
            })
            .unwrap();
        assert_eq!(health, 70);
        assert_eq!(registry.get(id).unwrap().health, 70);
    }

    #[test]
    fn test_mutate_outside_host_is_refused() {
        let mut registry = EntityRegistry::new(Authority::Observer);
        let result = registry.mutate(PlayerId(1), |record| record.health = 0);
        assert!(matches!(
            result,
            Err(NetError::AuthorityViolation { call: None, .. })
        ));

        let result = registry.register(PlayerId(1), PlayerRecord::new(EntityRef(1), ConnectionId(1)));
        assert!(matches!(result, Err(NetError::AuthorityViolation { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_owner_and_entity() {
        let mut registry = host_registry();
        let a = registry.register_new(EntityRef(10), ConnectionId(7)).unwrap();
        let b = registry.register_new(EntityRef(20), ConnectionId(8)).unwrap();

        assert_eq!(registry.find_by_owner(ConnectionId(8)), Some(b));
        assert_eq!(registry.find_by_entity(EntityRef(10)), Some(a));
        assert_eq!(registry.find_by_owner(ConnectionId(99)), None);
    }
}
