//! Authoritative host session
//!
//! [`HostSession`] is the single owner of everything the host simulates: the
//! player registry, the scene, combat and projectile state, and the router
//! that decides which calls run here and where their replication goes. It is
//! transport-agnostic; the network layer feeds it decoded calls and flushes
//! its outbox to sockets.
//!
//! The host keeps its own [`ObserverView`] and applies every fan-out call to
//! it, so the host sees exactly what a freshly synced observer would.

use crate::combat::CombatController;
use crate::config::ServerConfig;
use crate::projectile::{ProjectileLifecycle, Shot};
use crate::registry::EntityRegistry;
use crate::scene::{Scene, Transform};
use log::{debug, info, warn};
use shared::{
    invoke, Authority, CallContext, CallId, Caller, ConnectionId, EntityRef, Envelope, NetError,
    NetResult, ObserverView, Outcome, PlayerId, PlayerSnapshot, RemoteCall, RemoteCallRouter,
    RouterHost, Vec3,
};
use std::time::Duration;

pub struct HostSession {
    config: ServerConfig,
    router: RemoteCallRouter<HostSession>,
    registry: EntityRegistry,
    scene: Scene,
    combat: CombatController,
    projectiles: ProjectileLifecycle,
    view: ObserverView,
}

impl RouterHost for HostSession {
    fn router(&self) -> &RemoteCallRouter<Self> {
        &self.router
    }

    fn router_mut(&mut self) -> &mut RemoteCallRouter<Self> {
        &mut self.router
    }

    fn owner_of(&self, player: PlayerId) -> Option<ConnectionId> {
        self.registry.get(player).ok().map(|record| record.owner)
    }
}

impl HostSession {
    pub fn new(config: ServerConfig) -> Self {
        let mut router = RemoteCallRouter::new(Authority::Host);
        router
            .register(CallId::Fire, on_fire)
            .register(CallId::ApplyDamage, on_apply_damage)
            .register(CallId::DespawnProjectile, on_despawn_projectile)
            .register(CallId::SyncTransform, on_sync_transform)
            .register(CallId::RequestSync, on_request_sync)
            .register(CallId::PlayerJoined, on_replicated)
            .register(CallId::PlayerLeft, on_replicated)
            .register(CallId::SetHealth, on_replicated)
            .register(CallId::SetKills, on_replicated)
            .register(CallId::SetDeaths, on_replicated)
            .register(CallId::TransformChanged, on_replicated)
            .register(CallId::ProjectileSpawned, on_replicated)
            .register(CallId::SetProjectileVisual, on_projectile_visual)
            .register(CallId::ProjectileDespawned, on_replicated)
            .register(CallId::Relocate, on_relocate)
            .register(CallId::SyncState, on_sync_state);

        let scene = Scene::new(
            config.spawn_points.clone(),
            config.walls.clone(),
            config.hit_radius,
        );
        let projectiles = ProjectileLifecycle::new(
            config.weapon_damage,
            config.max_range,
            config.muzzle_offset,
            config.fire_interval,
            config.despawn_grace,
        );

        Self {
            combat: CombatController::new(config.seed),
            registry: EntityRegistry::new(Authority::Host),
            router,
            scene,
            projectiles,
            view: ObserverView::new(),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn projectiles(&self) -> &ProjectileLifecycle {
        &self.projectiles
    }

    /// The host's own replica of the replicated state
    pub fn view(&self) -> &ObserverView {
        &self.view
    }

    pub fn player_for(&self, connection: ConnectionId) -> Option<PlayerId> {
        self.registry.find_by_owner(connection)
    }

    /// Admits a new connection: spawns its player, syncs the full state to it
    /// and announces it to everyone.
    pub fn connect(&mut self, connection: ConnectionId) -> NetResult<PlayerId> {
        if let Some(existing) = self.player_for(connection) {
            warn!("{} is already connected as {}", connection, existing);
            return Ok(existing);
        }

        let position = match self.combat.pick_spawn(&self.scene) {
            Ok(position) => position,
            Err(e) => {
                warn!("No spawn point for {}: {}, using origin", connection, e);
                Vec3::ZERO
            }
        };
        let entity = self.scene.spawn_entity(Transform::at(position));
        let player = match self.registry.register_new(entity, connection) {
            Ok(player) => player,
            Err(e) => {
                self.scene.despawn_entity(entity);
                return Err(e);
            }
        };
        self.router.outbox_mut().attach(connection);
        info!("{} joined as {} at {:?}", connection, player, position);

        let sync = self.state_sync(connection);
        let joined = RemoteCall::PlayerJoined {
            player: self.snapshot(player)?,
        };
        self.dispatch(vec![sync, joined]);

        Ok(player)
    }

    /// Removes a connection and everything it owned. Unknown connections are
    /// ignored.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Option<PlayerId> {
        if let Some(discarded) = self.router.outbox_mut().detach(connection) {
            debug!("{} left with {} undelivered calls", connection, discarded);
        }
        let player = self.player_for(connection)?;

        let mut effects: Vec<RemoteCall> = self
            .projectiles
            .teardown_controller(player)
            .into_iter()
            .map(|projectile| RemoteCall::ProjectileDespawned {
                projectile,
                controller: player,
            })
            .collect();

        match self.registry.remove(player) {
            Ok(record) => {
                self.scene.despawn_entity(record.entity);
            }
            Err(e) => warn!("Removing {} failed: {}", player, e),
        }
        effects.push(RemoteCall::PlayerLeft { player });
        self.dispatch(effects);

        info!("{} ({}) left", connection, player);
        Some(player)
    }

    /// Routes a call that arrived from a remote endpoint.
    pub fn handle_remote(
        &mut self,
        connection: ConnectionId,
        call: RemoteCall,
    ) -> NetResult<Outcome> {
        let id = call.id();
        let result = invoke(self, &CallContext::connection(connection), call);
        if let Err(e) = &result {
            warn!("{:?} from {} rejected: {}", id, connection, e);
        }
        result
    }

    /// Routes a call issued by host-side logic.
    pub fn handle_local(&mut self, call: RemoteCall) -> NetResult<Outcome> {
        invoke(self, &CallContext::host(), call)
    }

    /// Advances the simulation clock and runs whatever despawns came due.
    pub fn tick(&mut self, dt: Duration) {
        let requests = self.projectiles.advance(dt);
        self.dispatch(requests);
    }

    /// Takes every queued envelope, in per-connection order.
    pub fn drain_outbox(&mut self) -> Vec<(ConnectionId, Envelope)> {
        self.router.outbox_mut().drain()
    }

    /// Targeted calls dropped because their connection was gone.
    pub fn routing_drops(&self) -> u64 {
        self.router.outbox().dropped()
    }

    pub fn snapshot(&self, player: PlayerId) -> NetResult<PlayerSnapshot> {
        let record = self.registry.get(player)?;
        let transform = self
            .scene
            .transform(record.entity)
            .unwrap_or_else(|| Transform::at(Vec3::ZERO));
        Ok(record.snapshot(player, transform.position, transform.forward))
    }

    /// Full replicated state addressed to one connection.
    fn state_sync(&self, connection: ConnectionId) -> RemoteCall {
        RemoteCall::SyncState {
            connection,
            players: self.player_snapshots(),
            projectiles: self.projectiles.snapshots(),
        }
    }

    fn player_snapshots(&self) -> Vec<PlayerSnapshot> {
        self.registry
            .iter()
            .filter_map(|(id, _)| self.snapshot(id).ok())
            .collect()
    }

    /// Fans out the current transform of a player's body.
    fn announce_transform(&mut self, player: PlayerId, entity: EntityRef) {
        if let Some(transform) = self.scene.transform(entity) {
            self.dispatch(vec![RemoteCall::TransformChanged {
                player,
                position: transform.position,
                forward: transform.forward,
            }]);
        }
    }

    /// Routes follow-up calls produced by a handler, in order. Failures are
    /// logged; the remaining calls still go out.
    fn dispatch(&mut self, effects: Vec<RemoteCall>) {
        for call in effects {
            let id = call.id();
            if let Err(e) = invoke(self, &CallContext::host(), call) {
                warn!("Follow-up {:?} failed: {}", id, e);
            }
        }
    }
}

fn mismatched(call: &RemoteCall) -> NetError {
    NetError::Unroutable(call.id())
}

fn on_fire(state: &mut HostSession, _ctx: &CallContext, call: &RemoteCall) -> NetResult<()> {
    let RemoteCall::Fire {
        shooter,
        origin,
        direction,
    } = *call
    else {
        return Err(mismatched(call));
    };

    let body = state.registry.get(shooter)?.entity;
    let transform = state
        .scene
        .transform(body)
        .ok_or(NetError::NotFound(shooter))?;
    let shot = Shot {
        shooter,
        body,
        position: transform.position,
        forward: transform.forward,
        origin,
        direction,
    };

    let mut effects = Vec::new();
    state
        .projectiles
        .fire(shot, &state.scene, &state.registry, &mut effects)?;
    state.dispatch(effects);
    Ok(())
}

fn on_apply_damage(state: &mut HostSession, ctx: &CallContext, call: &RemoteCall) -> NetResult<()> {
    let RemoteCall::ApplyDamage {
        target,
        amount,
        attacker,
    } = *call
    else {
        return Err(mismatched(call));
    };

    if amount < 0 {
        return Err(NetError::authority(CallId::ApplyDamage, "negative damage"));
    }

    // A peer only reports that its shot landed; the host decides how much it hurts
    let amount = match ctx.caller {
        Caller::Host => amount,
        Caller::Connection(connection) => {
            if state.owner_of(attacker) != Some(connection) {
                return Err(NetError::authority(
                    CallId::ApplyDamage,
                    format!("{} does not control {}", connection, attacker),
                ));
            }
            state.registry.get(target)?;
            state.projectiles.claim_hit(attacker)?;
            if amount != state.config.weapon_damage {
                debug!(
                    "{} reported {} damage, applying {}",
                    connection, amount, state.config.weapon_damage
                );
            }
            state.config.weapon_damage
        }
    };

    let mut effects = Vec::new();
    let result = state.combat.apply_damage(
        &mut state.registry,
        &state.scene,
        target,
        amount,
        attacker,
        &mut effects,
    );
    state.dispatch(effects);
    result.map(|_| ())
}

fn on_despawn_projectile(
    state: &mut HostSession,
    _ctx: &CallContext,
    call: &RemoteCall,
) -> NetResult<()> {
    let RemoteCall::DespawnProjectile {
        projectile,
        controller,
    } = *call
    else {
        return Err(mismatched(call));
    };

    state.projectiles.despawn(projectile, controller)?;
    state.dispatch(vec![RemoteCall::ProjectileDespawned {
        projectile,
        controller,
    }]);
    Ok(())
}

fn on_sync_transform(
    state: &mut HostSession,
    _ctx: &CallContext,
    call: &RemoteCall,
) -> NetResult<()> {
    let RemoteCall::SyncTransform {
        player,
        position,
        forward,
    } = *call
    else {
        return Err(mismatched(call));
    };

    if !position.is_finite() || !forward.is_finite() {
        return Err(NetError::authority(
            CallId::SyncTransform,
            "transform is not finite",
        ));
    }

    let entity = state.registry.get(player)?.entity;
    state.scene.set_transform(entity, position, forward);
    state.announce_transform(player, entity);
    Ok(())
}

fn on_request_sync(
    state: &mut HostSession,
    ctx: &CallContext,
    call: &RemoteCall,
) -> NetResult<()> {
    let Caller::Connection(connection) = ctx.caller else {
        return Err(NetError::authority(
            call.id(),
            "state syncs are requested by connections",
        ));
    };
    if state.player_for(connection).is_none() {
        return Err(NetError::authority(
            call.id(),
            format!("{} is not connected", connection),
        ));
    }

    debug!("{} requested a state sync", connection);
    let sync = state.state_sync(connection);
    state.dispatch(vec![sync]);
    Ok(())
}

fn on_replicated(state: &mut HostSession, _ctx: &CallContext, call: &RemoteCall) -> NetResult<()> {
    if !state.view.apply_call(call) {
        debug!("Host view ignored {:?}", call.id());
    }
    Ok(())
}

fn on_projectile_visual(
    state: &mut HostSession,
    ctx: &CallContext,
    call: &RemoteCall,
) -> NetResult<()> {
    let RemoteCall::SetProjectileVisual {
        projectile,
        controller,
        start,
        end,
    } = *call
    else {
        return Err(mismatched(call));
    };

    state
        .projectiles
        .record_handle(projectile, controller, start, end)?;
    on_replicated(state, ctx, call)
}

fn on_relocate(state: &mut HostSession, _ctx: &CallContext, call: &RemoteCall) -> NetResult<()> {
    let RemoteCall::Relocate {
        player, position, ..
    } = *call
    else {
        return Err(mismatched(call));
    };

    let entity = state.registry.get(player)?.entity;
    state.scene.teleport(entity, position);
    state.announce_transform(player, entity);
    Ok(())
}

fn on_sync_state(_state: &mut HostSession, _ctx: &CallContext, _call: &RemoteCall) -> NetResult<()> {
    // The host is the source of the state; only the addressee applies it
    Ok(())
}
