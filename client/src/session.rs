//! Observer-side session
//!
//! The client never mutates replicated state on its own authority. Local
//! intent (pulling the trigger, moving) is routed as owner-only calls: they
//! run only for the player this connection owns and turn into host-validated
//! requests that the router forwards to the host. Everything the host
//! replicates comes back through [`ClientSession::receive`] in sequence order;
//! when that stream breaks, the session asks the host for a fresh state sync.

use log::{debug, info, warn};
use shared::{
    invoke, Authority, CallContext, CallId, ConnectionId, NetError, NetResult, ObserverView,
    Outcome, PlayerId, RemoteCall, RemoteCallRouter, RouterHost, Vec3,
};

pub struct ClientSession {
    router: RemoteCallRouter<ClientSession>,
    view: ObserverView,
    identity: Option<(ConnectionId, PlayerId)>,
    resync_requested: bool,
}

impl RouterHost for ClientSession {
    fn router(&self) -> &RemoteCallRouter<Self> {
        &self.router
    }

    fn router_mut(&mut self) -> &mut RemoteCallRouter<Self> {
        &mut self.router
    }

    fn owner_of(&self, player: PlayerId) -> Option<ConnectionId> {
        self.view.player(player).map(|snapshot| snapshot.owner)
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        let mut router = RemoteCallRouter::new(Authority::Observer);
        router
            .register(CallId::TriggerPull, on_trigger_pull)
            .register(CallId::Move, on_move);

        Self {
            router,
            view: ObserverView::new(),
            identity: None,
            resync_requested: false,
        }
    }

    /// Records the identity assigned by the host's handshake.
    pub fn set_identity(&mut self, connection: ConnectionId, player: PlayerId) {
        info!("Playing as {} on {}", player, connection);
        self.identity = Some((connection, player));
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.identity.map(|(connection, _)| connection)
    }

    pub fn player(&self) -> Option<PlayerId> {
        self.identity.map(|(_, player)| player)
    }

    pub fn view(&self) -> &ObserverView {
        &self.view
    }

    /// Current position of the local player as last replicated.
    pub fn position(&self) -> Option<Vec3> {
        self.player()
            .and_then(|player| self.view.player(player))
            .map(|snapshot| snapshot.position)
    }

    /// Requests a shot for the local player.
    pub fn trigger_pull(&mut self, origin: Vec3, direction: Vec3) -> NetResult<Outcome> {
        let Some((connection, shooter)) = self.identity else {
            return Ok(Outcome::Inert);
        };
        invoke(
            self,
            &CallContext::connection(connection),
            RemoteCall::TriggerPull {
                shooter,
                origin,
                direction,
            },
        )
    }

    /// Asks the host to move the local player. The view only changes once the
    /// host replicates the accepted transform.
    pub fn move_to(&mut self, position: Vec3, forward: Vec3) -> NetResult<Outcome> {
        let Some((connection, player)) = self.identity else {
            return Ok(Outcome::Inert);
        };
        invoke(
            self,
            &CallContext::connection(connection),
            RemoteCall::Move {
                player,
                position,
                forward,
            },
        )
    }

    /// Applies one replicated envelope and returns the calls it released.
    pub fn receive(&mut self, seq: u64, call: RemoteCall) -> Vec<RemoteCall> {
        let applied = self.view.receive(seq, call);
        for call in &applied {
            if let RemoteCall::Relocate {
                player, position, ..
            } = call
            {
                if Some(*player) == self.player() {
                    info!("Respawned at {:?}", position);
                }
            }
        }

        if !self.view.is_desynced() {
            self.resync_requested = false;
        } else if !self.resync_requested {
            self.request_resync();
        }
        applied
    }

    /// Periodic upkeep: asks for a state sync while the replication stream
    /// is stalled. Repeats on every call until the sync arrives.
    pub fn maintain(&mut self) {
        if self.view.check_stall() {
            self.request_resync();
        }
    }

    fn request_resync(&mut self) {
        let Some(connection) = self.connection() else {
            return;
        };
        match invoke(self, &CallContext::connection(connection), RemoteCall::RequestSync) {
            Ok(_) => self.resync_requested = true,
            Err(e) => warn!("State sync request failed: {}", e),
        }
    }

    /// Takes the calls waiting to be sent to the host.
    pub fn take_outgoing(&mut self) -> Vec<RemoteCall> {
        self.router.outbox_mut().drain_forwarded()
    }

    /// Forgets everything learned from the host.
    pub fn reset(&mut self) {
        self.identity = None;
        self.view = ObserverView::new();
        self.resync_requested = false;
        self.router.outbox_mut().drain_forwarded();
    }
}

fn on_trigger_pull(
    state: &mut ClientSession,
    ctx: &CallContext,
    call: &RemoteCall,
) -> NetResult<()> {
    let RemoteCall::TriggerPull {
        shooter,
        origin,
        direction,
    } = *call
    else {
        return Err(NetError::Unroutable(call.id()));
    };

    if let Some(projectile) = state.view.handle(shooter) {
        debug!("{} still live, trigger ignored", projectile);
        return Ok(());
    }

    invoke(
        state,
        ctx,
        RemoteCall::Fire {
            shooter,
            origin,
            direction,
        },
    )?;
    Ok(())
}

fn on_move(state: &mut ClientSession, ctx: &CallContext, call: &RemoteCall) -> NetResult<()> {
    let RemoteCall::Move {
        player,
        position,
        forward,
    } = *call
    else {
        return Err(NetError::Unroutable(call.id()));
    };

    invoke(
        state,
        ctx,
        RemoteCall::SyncTransform {
            player,
            position,
            forward,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{EntityRef, PlayerSnapshot, ProjectileId};

    fn snapshot(id: u32, owner: u32) -> PlayerSnapshot {
        PlayerSnapshot {
            id: PlayerId(id),
            owner: ConnectionId(owner),
            entity: EntityRef(id),
            health: 100,
            kills: 0,
            deaths: 0,
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
        }
    }

    fn synced() -> ClientSession {
        let mut session = ClientSession::new();
        session.set_identity(ConnectionId(1), PlayerId(1));
        session.receive(
            1,
            RemoteCall::SyncState {
                connection: ConnectionId(1),
                players: vec![snapshot(1, 1), snapshot(2, 2)],
                projectiles: Vec::new(),
            },
        );
        session
    }

    #[test]
    fn test_trigger_pull_forwards_fire() {
        let mut session = synced();

        let outcome = session.trigger_pull(Vec3::ZERO, Vec3::FORWARD).unwrap();
        assert_eq!(outcome, Outcome::Executed);
        assert_eq!(
            session.take_outgoing(),
            vec![RemoteCall::Fire {
                shooter: PlayerId(1),
                origin: Vec3::ZERO,
                direction: Vec3::FORWARD,
            }]
        );
    }

    #[test]
    fn test_trigger_pull_for_foreign_player_is_inert() {
        let mut session = synced();
        let pull = RemoteCall::TriggerPull {
            shooter: PlayerId(2),
            origin: Vec3::ZERO,
            direction: Vec3::FORWARD,
        };

        let outcome = invoke(&mut session, &CallContext::connection(ConnectionId(1)), pull);
        assert_eq!(outcome, Ok(Outcome::Inert));
        assert!(session.take_outgoing().is_empty());
    }

    #[test]
    fn test_trigger_pull_suppressed_while_projectile_live() {
        let mut session = synced();
        session.receive(
            2,
            RemoteCall::ProjectileSpawned {
                projectile: ProjectileId(1),
                controller: PlayerId(1),
                position: Vec3::FORWARD,
            },
        );
        session.receive(
            3,
            RemoteCall::SetProjectileVisual {
                projectile: ProjectileId(1),
                controller: PlayerId(1),
                start: Vec3::ZERO,
                end: Vec3::new(0.0, 0.0, 100.0),
            },
        );

        session.trigger_pull(Vec3::ZERO, Vec3::FORWARD).unwrap();
        assert!(session.take_outgoing().is_empty());

        session.receive(
            4,
            RemoteCall::ProjectileDespawned {
                projectile: ProjectileId(1),
                controller: PlayerId(1),
            },
        );
        session.trigger_pull(Vec3::ZERO, Vec3::FORWARD).unwrap();
        assert_eq!(session.take_outgoing().len(), 1);
    }

    #[test]
    fn test_other_players_projectile_does_not_block_local_fire() {
        let mut session = synced();
        session.receive(
            2,
            RemoteCall::ProjectileSpawned {
                projectile: ProjectileId(9),
                controller: PlayerId(2),
                position: Vec3::ZERO,
            },
        );
        session.receive(
            3,
            RemoteCall::SetProjectileVisual {
                projectile: ProjectileId(9),
                controller: PlayerId(2),
                start: Vec3::ZERO,
                end: Vec3::FORWARD,
            },
        );

        session.trigger_pull(Vec3::ZERO, Vec3::FORWARD).unwrap();
        assert_eq!(session.take_outgoing().len(), 1);
    }

    #[test]
    fn test_move_forwards_sync_without_touching_view() {
        let mut session = synced();
        let target = Vec3::new(4.0, 0.0, 2.0);

        session.move_to(target, Vec3::FORWARD).unwrap();
        assert_eq!(session.position(), Some(Vec3::ZERO));
        assert_eq!(
            session.take_outgoing(),
            vec![RemoteCall::SyncTransform {
                player: PlayerId(1),
                position: target,
                forward: Vec3::FORWARD,
            }]
        );

        session.receive(
            2,
            RemoteCall::TransformChanged {
                player: PlayerId(1),
                position: target,
                forward: Vec3::FORWARD,
            },
        );
        assert_eq!(session.position(), Some(target));
    }

    #[test]
    fn test_stalled_stream_requests_state_sync() {
        let mut session = synced();
        // seq 2 never arrives
        session.receive(3, RemoteCall::PlayerLeft { player: PlayerId(2) });

        session.maintain();
        assert!(session.take_outgoing().is_empty());
        session.maintain();
        assert_eq!(session.take_outgoing(), vec![RemoteCall::RequestSync]);

        // Still waiting: ask again
        session.maintain();
        assert_eq!(session.take_outgoing(), vec![RemoteCall::RequestSync]);

        session.receive(
            4,
            RemoteCall::SyncState {
                connection: ConnectionId(1),
                players: vec![snapshot(1, 1)],
                projectiles: Vec::new(),
            },
        );
        assert!(!session.view().is_desynced());
        assert!(session.view().player(PlayerId(2)).is_none());
        session.maintain();
        assert!(session.take_outgoing().is_empty());
    }

    #[test]
    fn test_backlog_overflow_requests_sync_once() {
        let mut session = synced();
        let backlog = shared::replica::DEFAULT_MAX_BACKLOG as u64;
        for seq in 3..=backlog + 3 {
            session.receive(
                seq,
                RemoteCall::SetHealth {
                    player: PlayerId(2),
                    health: 50,
                },
            );
        }
        assert!(session.view().is_desynced());
        assert_eq!(session.take_outgoing(), vec![RemoteCall::RequestSync]);

        session.receive(
            backlog + 4,
            RemoteCall::SetHealth {
                player: PlayerId(2),
                health: 40,
            },
        );
        assert!(session.take_outgoing().is_empty());
    }

    #[test]
    fn test_calls_before_handshake_are_inert() {
        let mut session = ClientSession::new();
        assert_eq!(
            session.trigger_pull(Vec3::ZERO, Vec3::FORWARD),
            Ok(Outcome::Inert)
        );
        assert!(session.take_outgoing().is_empty());
    }

    #[test]
    fn test_relocation_moves_local_player() {
        let mut session = synced();
        session.receive(
            2,
            RemoteCall::Relocate {
                connection: ConnectionId(1),
                player: PlayerId(1),
                position: Vec3::new(10.0, 1.0, 10.0),
            },
        );
        assert_eq!(session.position(), Some(Vec3::new(10.0, 1.0, 10.0)));
    }
}
