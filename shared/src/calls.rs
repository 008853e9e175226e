//! The remote-call vocabulary shared by host and observers.
//!
//! Each [`RemoteCall`] variant has a stable [`CallId`], and each id has exactly
//! one [`Discipline`] that decides where the call body may run and who sees
//! its effects.

use crate::ids::{ConnectionId, EntityRef, PlayerId, ProjectileId};
use crate::math::Vec3;
use serde::{Deserialize, Serialize};

/// Where a call may execute and how its effects travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Body runs on the host only. Anywhere else the call is forwarded to the
    /// host and the local stub returns without side effects.
    HostValidated { require_ownership: bool },
    /// Body runs locally only for the owner of the subject entity.
    OwnerOnly,
    /// Runs on the host, then replays on every connected observer.
    FanOutObservers,
    /// Runs on the host, then replays on exactly one addressed connection.
    TargetedSingle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallId {
    Fire,
    ApplyDamage,
    DespawnProjectile,
    SyncTransform,
    RequestSync,
    TriggerPull,
    Move,
    PlayerJoined,
    PlayerLeft,
    SetHealth,
    SetKills,
    SetDeaths,
    TransformChanged,
    ProjectileSpawned,
    SetProjectileVisual,
    ProjectileDespawned,
    Relocate,
    SyncState,
}

impl CallId {
    pub fn discipline(self) -> Discipline {
        match self {
            CallId::Fire | CallId::DespawnProjectile | CallId::SyncTransform => {
                Discipline::HostValidated {
                    require_ownership: true,
                }
            }
            // Not tied to a subject the caller owns; the handlers check the caller.
            CallId::ApplyDamage | CallId::RequestSync => Discipline::HostValidated {
                require_ownership: false,
            },
            CallId::TriggerPull | CallId::Move => Discipline::OwnerOnly,
            CallId::PlayerJoined
            | CallId::PlayerLeft
            | CallId::SetHealth
            | CallId::SetKills
            | CallId::SetDeaths
            | CallId::TransformChanged
            | CallId::ProjectileSpawned
            | CallId::SetProjectileVisual
            | CallId::ProjectileDespawned => Discipline::FanOutObservers,
            CallId::Relocate | CallId::SyncState => Discipline::TargetedSingle,
        }
    }

    /// True for calls the host replays to observers.
    pub fn is_replicated(self) -> bool {
        matches!(
            self.discipline(),
            Discipline::FanOutObservers | Discipline::TargetedSingle
        )
    }
}

/// Replicated view of one player, as carried in joins and state syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub owner: ConnectionId,
    pub entity: EntityRef,
    pub health: i32,
    pub kills: u32,
    pub deaths: u32,
    pub position: Vec3,
    pub forward: Vec3,
}

/// Replicated view of one live projectile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: ProjectileId,
    pub controller: PlayerId,
    pub position: Vec3,
    pub visual: Option<(Vec3, Vec3)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteCall {
    // Host-validated requests
    Fire {
        shooter: PlayerId,
        origin: Vec3,
        direction: Vec3,
    },
    ApplyDamage {
        target: PlayerId,
        amount: i32,
        attacker: PlayerId,
    },
    DespawnProjectile {
        projectile: ProjectileId,
        controller: PlayerId,
    },
    SyncTransform {
        player: PlayerId,
        position: Vec3,
        forward: Vec3,
    },
    /// Asks the host to resend the full state to the calling connection.
    RequestSync,

    // Owner-only local calls
    TriggerPull {
        shooter: PlayerId,
        origin: Vec3,
        direction: Vec3,
    },
    Move {
        player: PlayerId,
        position: Vec3,
        forward: Vec3,
    },

    // Fan-out replication
    PlayerJoined {
        player: PlayerSnapshot,
    },
    PlayerLeft {
        player: PlayerId,
    },
    SetHealth {
        player: PlayerId,
        health: i32,
    },
    SetKills {
        player: PlayerId,
        kills: u32,
    },
    SetDeaths {
        player: PlayerId,
        deaths: u32,
    },
    TransformChanged {
        player: PlayerId,
        position: Vec3,
        forward: Vec3,
    },
    ProjectileSpawned {
        projectile: ProjectileId,
        controller: PlayerId,
        position: Vec3,
    },
    SetProjectileVisual {
        projectile: ProjectileId,
        controller: PlayerId,
        start: Vec3,
        end: Vec3,
    },
    ProjectileDespawned {
        projectile: ProjectileId,
        controller: PlayerId,
    },

    // Targeted replication
    Relocate {
        connection: ConnectionId,
        player: PlayerId,
        position: Vec3,
    },
    SyncState {
        connection: ConnectionId,
        players: Vec<PlayerSnapshot>,
        projectiles: Vec<ProjectileSnapshot>,
    },
}

impl RemoteCall {
    pub fn id(&self) -> CallId {
        match self {
            RemoteCall::Fire { .. } => CallId::Fire,
            RemoteCall::ApplyDamage { .. } => CallId::ApplyDamage,
            RemoteCall::DespawnProjectile { .. } => CallId::DespawnProjectile,
            RemoteCall::SyncTransform { .. } => CallId::SyncTransform,
            RemoteCall::RequestSync => CallId::RequestSync,
            RemoteCall::TriggerPull { .. } => CallId::TriggerPull,
            RemoteCall::Move { .. } => CallId::Move,
            RemoteCall::PlayerJoined { .. } => CallId::PlayerJoined,
            RemoteCall::PlayerLeft { .. } => CallId::PlayerLeft,
            RemoteCall::SetHealth { .. } => CallId::SetHealth,
            RemoteCall::SetKills { .. } => CallId::SetKills,
            RemoteCall::SetDeaths { .. } => CallId::SetDeaths,
            RemoteCall::TransformChanged { .. } => CallId::TransformChanged,
            RemoteCall::ProjectileSpawned { .. } => CallId::ProjectileSpawned,
            RemoteCall::SetProjectileVisual { .. } => CallId::SetProjectileVisual,
            RemoteCall::ProjectileDespawned { .. } => CallId::ProjectileDespawned,
            RemoteCall::Relocate { .. } => CallId::Relocate,
            RemoteCall::SyncState { .. } => CallId::SyncState,
        }
    }

    /// The player whose owner is checked for ownership-gated calls.
    pub fn subject(&self) -> Option<PlayerId> {
        match self {
            RemoteCall::Fire { shooter, .. } | RemoteCall::TriggerPull { shooter, .. } => {
                Some(*shooter)
            }
            RemoteCall::DespawnProjectile { controller, .. } => Some(*controller),
            RemoteCall::SyncTransform { player, .. } | RemoteCall::Move { player, .. } => {
                Some(*player)
            }
            RemoteCall::ApplyDamage { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// The single connection a targeted call is addressed to.
    pub fn addressee(&self) -> Option<ConnectionId> {
        match self {
            RemoteCall::Relocate { connection, .. } | RemoteCall::SyncState { connection, .. } => {
                Some(*connection)
            }
            _ => None,
        }
    }
}
