//! Read-only replicated state as seen by an observer.
//!
//! Every process keeps one [`ObserverView`]: remote clients feed it from the
//! host's replication stream, and the host applies its own fan-out calls to
//! it as its local view. Nothing in here is authoritative.

use crate::calls::{PlayerSnapshot, ProjectileSnapshot, RemoteCall};
use crate::ids::{PlayerId, ProjectileId};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

/// How many out-of-order envelopes are held before a gap counts as lost.
pub const DEFAULT_MAX_BACKLOG: usize = 64;

#[derive(Debug)]
pub struct ObserverView {
    players: BTreeMap<PlayerId, PlayerSnapshot>,
    projectiles: BTreeMap<ProjectileId, ProjectileSnapshot>,
    /// Live projectile per firing controller
    handles: HashMap<PlayerId, ProjectileId>,
    next_seq: u64,
    backlog: BTreeMap<u64, RemoteCall>,
    max_backlog: usize,
    desynced: bool,
    stall_mark: Option<u64>,
}

impl Default for ObserverView {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverView {
    pub fn new() -> Self {
        Self::with_backlog(DEFAULT_MAX_BACKLOG)
    }

    pub fn with_backlog(max_backlog: usize) -> Self {
        Self {
            players: BTreeMap::new(),
            projectiles: BTreeMap::new(),
            handles: HashMap::new(),
            next_seq: 1,
            backlog: BTreeMap::new(),
            max_backlog: max_backlog.max(1),
            desynced: false,
            stall_mark: None,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerSnapshot> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerSnapshot> {
        self.players.values()
    }

    pub fn projectile(&self, id: ProjectileId) -> Option<&ProjectileSnapshot> {
        self.projectiles.get(&id)
    }

    pub fn projectiles(&self) -> impl Iterator<Item = &ProjectileSnapshot> {
        self.projectiles.values()
    }

    /// The projectile currently held by a firing controller.
    pub fn handle(&self, controller: PlayerId) -> Option<ProjectileId> {
        self.handles.get(&controller).copied()
    }

    /// Next sequence number this view expects from the host.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// True after a gap in the stream could not be filled. The view then
    /// waits for a fresh `SyncState` and ignores everything older than it.
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// Accepts one envelope from the host's stream.
    ///
    /// Envelopes are applied strictly in sequence order; early arrivals wait in
    /// the backlog and stale or duplicate ones are discarded. A gap that
    /// overflows the backlog is never skipped: the view marks itself desynced
    /// and resumes from the next state sync. Returns the calls that were
    /// applied, in the order they were applied.
    pub fn receive(&mut self, seq: u64, call: RemoteCall) -> Vec<RemoteCall> {
        if seq < self.next_seq || self.backlog.contains_key(&seq) {
            debug!("Discarding stale envelope {} (expecting {})", seq, self.next_seq);
            return Vec::new();
        }

        if self.desynced {
            return self.receive_desynced(seq, call);
        }

        self.backlog.insert(seq, call);
        if self.backlog.len() > self.max_backlog {
            warn!(
                "Replication gap at {} never filled, waiting for a state sync",
                self.next_seq
            );
            self.desynced = true;
            self.trim_backlog();
            return Vec::new();
        }

        self.drain_backlog()
    }

    /// Periodic liveness check for the stream.
    ///
    /// A gap that has not moved since the previous check marks the view as
    /// desynced. Returns true while a state sync is needed.
    pub fn check_stall(&mut self) -> bool {
        if self.backlog.is_empty() {
            self.stall_mark = None;
        } else if self.stall_mark == Some(self.next_seq) {
            if !self.desynced {
                warn!("Replication stalled at {}, waiting for a state sync", self.next_seq);
            }
            self.desynced = true;
        } else {
            self.stall_mark = Some(self.next_seq);
        }
        self.desynced
    }

    fn receive_desynced(&mut self, seq: u64, call: RemoteCall) -> Vec<RemoteCall> {
        if !matches!(call, RemoteCall::SyncState { .. }) {
            self.backlog.insert(seq, call);
            self.trim_backlog();
            return Vec::new();
        }

        // Everything sequenced before the sync is already folded into it
        self.backlog = self.backlog.split_off(&(seq + 1));
        self.next_seq = seq + 1;
        self.desynced = false;
        self.stall_mark = None;
        debug!("Resynced at {}", seq);

        self.apply_call(&call);
        let mut applied = vec![call];
        applied.extend(self.drain_backlog());
        applied
    }

    fn drain_backlog(&mut self) -> Vec<RemoteCall> {
        let mut applied = Vec::new();
        while let Some(call) = self.backlog.remove(&self.next_seq) {
            self.next_seq += 1;
            self.apply_call(&call);
            applied.push(call);
        }
        applied
    }

    fn trim_backlog(&mut self) {
        while self.backlog.len() > self.max_backlog {
            self.backlog.pop_first();
        }
    }

    /// Applies one replicated call directly, without sequencing.
    ///
    /// Returns false when the call is not a replication call or refers to
    /// state this view does not know about.
    pub fn apply_call(&mut self, call: &RemoteCall) -> bool {
        match call {
            RemoteCall::PlayerJoined { player } => {
                self.players.insert(player.id, player.clone());
                true
            }
            RemoteCall::PlayerLeft { player } => {
                self.handles.remove(player);
                self.players.remove(player).is_some()
            }
            RemoteCall::SetHealth { player, health } => {
                self.with_player(*player, |p| p.health = *health)
            }
            RemoteCall::SetKills { player, kills } => {
                self.with_player(*player, |p| p.kills = *kills)
            }
            RemoteCall::SetDeaths { player, deaths } => {
                self.with_player(*player, |p| p.deaths = *deaths)
            }
            RemoteCall::TransformChanged {
                player,
                position,
                forward,
            } => self.with_player(*player, |p| {
                p.position = *position;
                p.forward = *forward;
            }),
            RemoteCall::Relocate {
                player, position, ..
            } => self.with_player(*player, |p| p.position = *position),
            RemoteCall::ProjectileSpawned {
                projectile,
                controller,
                position,
            } => {
                self.projectiles.insert(
                    *projectile,
                    ProjectileSnapshot {
                        id: *projectile,
                        controller: *controller,
                        position: *position,
                        visual: None,
                    },
                );
                true
            }
            RemoteCall::SetProjectileVisual {
                projectile,
                controller,
                start,
                end,
            } => match self.projectiles.get_mut(projectile) {
                Some(snapshot) => {
                    snapshot.visual = Some((*start, *end));
                    // The handle belongs to the controller that fired, not to
                    // whichever instance this view happens to control.
                    self.handles.insert(*controller, *projectile);
                    true
                }
                None => {
                    warn!("Visual for unknown {}", projectile);
                    false
                }
            },
            RemoteCall::ProjectileDespawned {
                projectile,
                controller,
            } => {
                if self.handles.get(controller) == Some(projectile) {
                    self.handles.remove(controller);
                }
                self.projectiles.remove(projectile).is_some()
            }
            RemoteCall::SyncState {
                players,
                projectiles,
                ..
            } => {
                self.players = players.iter().map(|p| (p.id, p.clone())).collect();
                self.projectiles = projectiles.iter().map(|p| (p.id, p.clone())).collect();
                self.handles = projectiles
                    .iter()
                    .filter(|p| p.visual.is_some())
                    .map(|p| (p.controller, p.id))
                    .collect();
                true
            }
            other => {
                warn!("{:?} is not a replication call", other.id());
                false
            }
        }
    }

    fn with_player(&mut self, id: PlayerId, update: impl FnOnce(&mut PlayerSnapshot)) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                update(player);
                true
            }
            None => {
                debug!("Replicated update for unknown {}", id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ConnectionId, EntityRef};
    use crate::math::Vec3;

    fn snapshot(id: u32) -> PlayerSnapshot {
        PlayerSnapshot {
            id: PlayerId(id),
            owner: ConnectionId(id),
            entity: EntityRef(id),
            health: 100,
            kills: 0,
            deaths: 0,
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
        }
    }

    fn health(id: u32, health: i32) -> RemoteCall {
        RemoteCall::SetHealth {
            player: PlayerId(id),
            health,
        }
    }

    #[test]
    fn test_in_order_delivery() {
        let mut view = ObserverView::new();
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });
        view.receive(2, health(1, 95));

        assert_eq!(view.player(PlayerId(1)).unwrap().health, 95);
        assert_eq!(view.next_seq(), 3);
    }

    #[test]
    fn test_out_of_order_delivery_is_reordered() {
        let mut view = ObserverView::new();
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });

        // 3 arrives before 2: the later value must win once both are in.
        assert!(view.receive(3, health(1, 50)).is_empty());
        assert_eq!(view.player(PlayerId(1)).unwrap().health, 100);

        let applied = view.receive(2, health(1, 75));
        assert_eq!(applied.len(), 2);
        assert_eq!(view.player(PlayerId(1)).unwrap().health, 50);
    }

    #[test]
    fn test_duplicates_are_discarded() {
        let mut view = ObserverView::new();
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });
        view.receive(2, health(1, 40));
        assert!(view.receive(2, health(1, 10)).is_empty());
        assert_eq!(view.player(PlayerId(1)).unwrap().health, 40);
    }

    fn sync(players: Vec<PlayerSnapshot>) -> RemoteCall {
        RemoteCall::SyncState {
            connection: ConnectionId(1),
            players,
            projectiles: Vec::new(),
        }
    }

    #[test]
    fn test_overflowing_gap_waits_for_state_sync() {
        let mut view = ObserverView::with_backlog(2);
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });

        // seq 2 is lost for good
        view.receive(3, health(1, 90));
        view.receive(4, health(1, 80));
        assert!(!view.is_desynced());

        assert!(view.receive(5, health(1, 70)).is_empty());
        assert!(view.is_desynced());
        assert_eq!(view.player(PlayerId(1)).unwrap().health, 100);
        assert_eq!(view.next_seq(), 2);
    }

    #[test]
    fn test_state_sync_recovers_lost_envelope() {
        let mut view = ObserverView::with_backlog(2);
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });

        // seq 2 announced player 2 and never arrived
        for (seq, value) in [(3, 90), (4, 80), (5, 70)] {
            view.receive(seq, health(1, value));
        }
        assert!(view.is_desynced());
        assert!(view.player(PlayerId(2)).is_none());

        let mut current = snapshot(1);
        current.health = 70;
        view.receive(6, health(1, 60));
        let applied = view.receive(7, sync(vec![current, snapshot(2)]));
        assert_eq!(applied.len(), 1);
        assert!(!view.is_desynced());
        assert_eq!(view.player(PlayerId(1)).unwrap().health, 70);
        assert!(view.player(PlayerId(2)).is_some());

        view.receive(8, health(2, 45));
        assert_eq!(view.player(PlayerId(2)).unwrap().health, 45);
        assert_eq!(view.next_seq(), 9);
    }

    #[test]
    fn test_sync_applies_buffered_envelopes_after_it() {
        let mut view = ObserverView::with_backlog(1);
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });
        view.receive(3, health(1, 90));
        view.receive(4, health(1, 80));
        assert!(view.is_desynced());

        // 6 overtakes the sync it follows
        view.receive(6, health(1, 20));
        let applied = view.receive(5, sync(vec![snapshot(1)]));
        assert_eq!(applied.len(), 2);
        assert_eq!(view.player(PlayerId(1)).unwrap().health, 20);
    }

    #[test]
    fn test_stalled_gap_is_detected_on_second_check() {
        let mut view = ObserverView::new();
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });
        assert!(!view.check_stall());

        view.receive(3, health(1, 90));
        assert!(!view.check_stall());
        assert!(view.check_stall());

        view.receive(4, sync(vec![snapshot(1)]));
        assert!(!view.is_desynced());
        assert!(!view.check_stall());
    }

    #[test]
    fn test_gap_filled_between_checks_is_not_a_stall() {
        let mut view = ObserverView::new();
        view.receive(1, RemoteCall::PlayerJoined { player: snapshot(1) });
        view.receive(3, health(1, 90));
        assert!(!view.check_stall());

        view.receive(2, health(1, 95));
        assert!(!view.check_stall());
        assert_eq!(view.player(PlayerId(1)).unwrap().health, 90);
    }

    #[test]
    fn test_visual_records_handle_on_firing_controller() {
        let mut view = ObserverView::new();
        view.apply_call(&RemoteCall::ProjectileSpawned {
            projectile: ProjectileId(7),
            controller: PlayerId(2),
            position: Vec3::ZERO,
        });
        assert_eq!(view.handle(PlayerId(2)), None);

        view.apply_call(&RemoteCall::SetProjectileVisual {
            projectile: ProjectileId(7),
            controller: PlayerId(2),
            start: Vec3::ZERO,
            end: Vec3::new(0.0, 0.0, 10.0),
        });
        assert_eq!(view.handle(PlayerId(2)), Some(ProjectileId(7)));
        assert_eq!(view.handle(PlayerId(1)), None);

        view.apply_call(&RemoteCall::ProjectileDespawned {
            projectile: ProjectileId(7),
            controller: PlayerId(2),
        });
        assert_eq!(view.handle(PlayerId(2)), None);
        assert!(view.projectile(ProjectileId(7)).is_none());
    }

    #[test]
    fn test_sync_state_replaces_view() {
        let mut view = ObserverView::new();
        view.apply_call(&RemoteCall::PlayerJoined { player: snapshot(9) });

        let mut veteran = snapshot(1);
        veteran.kills = 3;
        view.apply_call(&RemoteCall::SyncState {
            connection: ConnectionId(2),
            players: vec![veteran, snapshot(2)],
            projectiles: vec![ProjectileSnapshot {
                id: ProjectileId(4),
                controller: PlayerId(1),
                position: Vec3::ZERO,
                visual: Some((Vec3::ZERO, Vec3::FORWARD)),
            }],
        });

        assert!(view.player(PlayerId(9)).is_none());
        assert_eq!(view.player(PlayerId(1)).unwrap().kills, 3);
        assert_eq!(view.handle(PlayerId(1)), Some(ProjectileId(4)));
    }

    #[test]
    fn test_request_calls_are_not_applied() {
        let mut view = ObserverView::new();
        let fire = RemoteCall::Fire {
            shooter: PlayerId(1),
            origin: Vec3::ZERO,
            direction: Vec3::FORWARD,
        };
        assert!(!view.apply_call(&fire));
    }
}
