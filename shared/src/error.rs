//! Error taxonomy shared by the host and observer processes.
//!
//! Every variant is recoverable at the call boundary: the session that issued
//! the call logs it and carries on with the next one.

use crate::calls::CallId;
use crate::ids::{ConnectionId, PlayerId, ProjectileId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// A mutating call reached an executor without the required authority.
    #[error("authority violation ({call:?}): {reason}")]
    AuthorityViolation {
        call: Option<CallId>,
        reason: String,
    },

    /// Lookup of a player identity that is not registered.
    #[error("{0} is not registered")]
    NotFound(PlayerId),

    /// Lookup of a projectile that is not (or no longer) spawned.
    #[error("{0} is not spawned")]
    UnknownProjectile(ProjectileId),

    /// The spawn-point set was empty when a respawn needed one.
    #[error("no spawn points configured")]
    NoSpawnPoints,

    /// A call was addressed to a connection that is not present.
    #[error("{0} is not connected, call dropped")]
    RoutingDrop(ConnectionId),

    /// No handler is registered for a call that must execute here.
    #[error("no handler registered for {0:?}")]
    Unroutable(CallId),

    #[error("{0} is already registered")]
    AlreadyRegistered(PlayerId),

    #[error("codec failure: {0}")]
    Codec(String),
}

impl NetError {
    pub fn authority(call: impl Into<Option<CallId>>, reason: impl Into<String>) -> Self {
        NetError::AuthorityViolation {
            call: call.into(),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for NetError {
    fn from(e: bincode::Error) -> Self {
        NetError::Codec(e.to_string())
    }
}

pub type NetResult<T> = Result<T, NetError>;
