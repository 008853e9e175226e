//! Remote-call dispatch and ordered replication.
//!
//! A [`RemoteCallRouter`] owns a dispatch table built at registration time
//! (call id → discipline + handler) and an [`Outbox`] that queues everything
//! leaving the process. On the host the outbox holds one ordered queue per
//! connected observer; on an observer it holds the calls forwarded to the
//! host. The router never touches a socket, the network layer drains it.

use crate::calls::{CallId, Discipline, RemoteCall};
use crate::error::{NetError, NetResult};
use crate::ids::{ConnectionId, PlayerId};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Which side of the authority split this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Host,
    Observer,
}

/// Who issued a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// The host itself (timers, nested calls from host-side logic).
    Host,
    /// A remote endpoint, or the local endpoint on an observer.
    Connection(ConnectionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Caller,
}

impl CallContext {
    pub fn host() -> Self {
        Self {
            caller: Caller::Host,
        }
    }

    pub fn connection(connection: ConnectionId) -> Self {
        Self {
            caller: Caller::Connection(connection),
        }
    }
}

/// Handler bodies receive the router host mutably.
pub type Handler<S> = fn(&mut S, &CallContext, &RemoteCall) -> NetResult<()>;

struct Route<S> {
    discipline: Discipline,
    handler: Handler<S>,
}

/// What the router decided for one call.
pub enum Resolution<S> {
    Execute {
        discipline: Discipline,
        handler: Handler<S>,
    },
    Forward,
    Inert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The body ran locally (and replication, if any, was queued).
    Executed,
    /// The call was queued for the host; nothing ran locally.
    Forwarded,
    /// The caller does not own the subject; nothing happened.
    Inert,
}

/// One replicated call with its per-connection sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub seq: u64,
    pub call: RemoteCall,
}

#[derive(Debug)]
struct ConnectionQueue {
    next_seq: u64,
    pending: VecDeque<Envelope>,
}

impl ConnectionQueue {
    fn new() -> Self {
        Self {
            next_seq: 1,
            pending: VecDeque::new(),
        }
    }

    fn push(&mut self, call: RemoteCall) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(Envelope { seq, call });
    }
}

/// Outgoing call queues, ordered per destination.
#[derive(Debug, Default)]
pub struct Outbox {
    queues: BTreeMap<ConnectionId, ConnectionQueue>,
    to_host: VecDeque<RemoteCall>,
    dropped: u64,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh, empty queue for a newly connected observer.
    pub fn attach(&mut self, connection: ConnectionId) -> bool {
        if self.queues.contains_key(&connection) {
            return false;
        }
        self.queues.insert(connection, ConnectionQueue::new());
        true
    }

    /// Removes a connection's queue, returning how many envelopes were discarded.
    pub fn detach(&mut self, connection: ConnectionId) -> Option<usize> {
        self.queues
            .remove(&connection)
            .map(|queue| queue.pending.len())
    }

    /// Queues `call` for every attached observer and returns the fan-out width.
    pub fn fan_out(&mut self, call: &RemoteCall) -> usize {
        for queue in self.queues.values_mut() {
            queue.push(call.clone());
        }
        self.queues.len()
    }

    /// Queues `call` for one connection; unknown connections are a routing drop.
    pub fn send_to(&mut self, connection: ConnectionId, call: RemoteCall) -> NetResult<()> {
        match self.queues.get_mut(&connection) {
            Some(queue) => {
                queue.push(call);
                Ok(())
            }
            None => {
                self.dropped += 1;
                Err(NetError::RoutingDrop(connection))
            }
        }
    }

    pub fn forward_to_host(&mut self, call: RemoteCall) {
        self.to_host.push_back(call);
    }

    /// Takes every pending envelope, in issue order for each connection.
    pub fn drain(&mut self) -> Vec<(ConnectionId, Envelope)> {
        let mut out = Vec::new();
        for (connection, queue) in self.queues.iter_mut() {
            out.extend(queue.pending.drain(..).map(|envelope| (*connection, envelope)));
        }
        out
    }

    #[cfg(test)]
    fn drain_for(&mut self, connection: ConnectionId) -> Vec<Envelope> {
        self.queues
            .get_mut(&connection)
            .map(|queue| queue.pending.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn drain_forwarded(&mut self) -> Vec<RemoteCall> {
        self.to_host.drain(..).collect()
    }

    /// Number of calls dropped because their addressee was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// State that owns a router and can answer ownership questions for it.
pub trait RouterHost: Sized {
    fn router(&self) -> &RemoteCallRouter<Self>;
    fn router_mut(&mut self) -> &mut RemoteCallRouter<Self>;
    fn owner_of(&self, player: PlayerId) -> Option<ConnectionId>;
}

pub struct RemoteCallRouter<S> {
    authority: Authority,
    routes: HashMap<CallId, Route<S>>,
    outbox: Outbox,
}

impl<S> RemoteCallRouter<S> {
    pub fn new(authority: Authority) -> Self {
        Self {
            authority,
            routes: HashMap::new(),
            outbox: Outbox::new(),
        }
    }

    pub fn is_host(&self) -> bool {
        self.authority == Authority::Host
    }

    /// Binds a handler to a call id. The discipline is fixed here, from the id.
    pub fn register(&mut self, id: CallId, handler: Handler<S>) -> &mut Self {
        let discipline = id.discipline();
        if self
            .routes
            .insert(id, Route { discipline, handler })
            .is_some()
        {
            warn!("Handler for {:?} replaced", id);
        }
        debug!("Registered {:?} as {:?}", id, discipline);
        self
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Decides what happens to `call` issued by `ctx`.
    ///
    /// `subject_owner` is the owning connection of the call's subject player,
    /// if it has one and it is known.
    pub fn resolve(
        &self,
        ctx: &CallContext,
        call: &RemoteCall,
        subject_owner: Option<ConnectionId>,
    ) -> NetResult<Resolution<S>> {
        let id = call.id();
        let route = self.routes.get(&id);
        let discipline = route.map_or_else(|| id.discipline(), |r| r.discipline);

        match discipline {
            Discipline::HostValidated { require_ownership } => {
                if !self.is_host() {
                    return Ok(Resolution::Forward);
                }
                if require_ownership {
                    if let Caller::Connection(connection) = ctx.caller {
                        if subject_owner != Some(connection) {
                            return Err(NetError::authority(
                                id,
                                format!("{} does not own the subject", connection),
                            ));
                        }
                    }
                }
            }
            Discipline::OwnerOnly => match ctx.caller {
                Caller::Connection(connection) if subject_owner == Some(connection) => {}
                _ => return Ok(Resolution::Inert),
            },
            Discipline::FanOutObservers | Discipline::TargetedSingle => {
                if !self.is_host() || ctx.caller != Caller::Host {
                    return Err(NetError::authority(
                        id,
                        "replication may only originate on the host",
                    ));
                }
            }
        }

        let route = route.ok_or(NetError::Unroutable(id))?;
        Ok(Resolution::Execute {
            discipline,
            handler: route.handler,
        })
    }

    /// Queues the replay of an executed call according to its discipline.
    fn replicate(&mut self, discipline: Discipline, call: RemoteCall) {
        match discipline {
            Discipline::FanOutObservers => {
                let width = self.outbox.fan_out(&call);
                debug!("Fanned out {:?} to {} observers", call.id(), width);
            }
            Discipline::TargetedSingle => match call.addressee() {
                Some(connection) => {
                    let id = call.id();
                    if let Err(e) = self.outbox.send_to(connection, call) {
                        warn!("{:?} dropped: {}", id, e);
                    }
                }
                None => warn!("Targeted call {:?} has no addressee", call.id()),
            },
            Discipline::HostValidated { .. } | Discipline::OwnerOnly => {}
        }
    }
}

/// Routes one call: executes, forwards or ignores it, and queues replication.
pub fn invoke<S: RouterHost>(
    state: &mut S,
    ctx: &CallContext,
    call: RemoteCall,
) -> NetResult<Outcome> {
    let owner = call.subject().and_then(|player| state.owner_of(player));

    match state.router().resolve(ctx, &call, owner)? {
        Resolution::Forward => {
            debug!("Forwarding {:?} to host", call.id());
            state.router_mut().outbox.forward_to_host(call);
            Ok(Outcome::Forwarded)
        }
        Resolution::Inert => {
            debug!("{:?} is inert for {:?}", call.id(), ctx.caller);
            Ok(Outcome::Inert)
        }
        Resolution::Execute {
            discipline,
            handler,
        } => {
            handler(state, ctx, &call)?;
            state.router_mut().replicate(discipline, call);
            Ok(Outcome::Executed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    /// Tiny router host that records what its handlers saw.
    struct Recorder {
        router: RemoteCallRouter<Recorder>,
        owners: HashMap<PlayerId, ConnectionId>,
        executed: Vec<CallId>,
    }

    impl RouterHost for Recorder {
        fn router(&self) -> &RemoteCallRouter<Self> {
            &self.router
        }

        fn router_mut(&mut self) -> &mut RemoteCallRouter<Self> {
            &mut self.router
        }

        fn owner_of(&self, player: PlayerId) -> Option<ConnectionId> {
            self.owners.get(&player).copied()
        }
    }

    fn record(state: &mut Recorder, _ctx: &CallContext, call: &RemoteCall) -> NetResult<()> {
        state.executed.push(call.id());
        Ok(())
    }

    fn recorder(authority: Authority) -> Recorder {
        let mut router = RemoteCallRouter::new(authority);
        router
            .register(CallId::Fire, record)
            .register(CallId::ApplyDamage, record)
            .register(CallId::TriggerPull, record)
            .register(CallId::SetHealth, record)
            .register(CallId::Relocate, record);

        let mut owners = HashMap::new();
        owners.insert(PlayerId(1), ConnectionId(10));
        owners.insert(PlayerId(2), ConnectionId(20));

        Recorder {
            router,
            owners,
            executed: Vec::new(),
        }
    }

    fn fire(shooter: u32) -> RemoteCall {
        RemoteCall::Fire {
            shooter: PlayerId(shooter),
            origin: Vec3::ZERO,
            direction: Vec3::FORWARD,
        }
    }

    #[test]
    fn test_host_validated_executes_on_host_for_owner() {
        let mut host = recorder(Authority::Host);
        let outcome = invoke(&mut host, &CallContext::connection(ConnectionId(10)), fire(1));
        assert_eq!(outcome, Ok(Outcome::Executed));
        assert_eq!(host.executed, vec![CallId::Fire]);
    }

    #[test]
    fn test_host_validated_refuses_non_owner() {
        let mut host = recorder(Authority::Host);
        let outcome = invoke(&mut host, &CallContext::connection(ConnectionId(20)), fire(1));
        assert!(matches!(
            outcome,
            Err(NetError::AuthorityViolation {
                call: Some(CallId::Fire),
                ..
            })
        ));
        assert!(host.executed.is_empty());
    }

    #[test]
    fn test_host_validated_without_ownership_accepts_any_caller() {
        let mut host = recorder(Authority::Host);
        let call = RemoteCall::ApplyDamage {
            target: PlayerId(1),
            amount: 5,
            attacker: PlayerId(2),
        };
        let outcome = invoke(&mut host, &CallContext::connection(ConnectionId(20)), call);
        assert_eq!(outcome, Ok(Outcome::Executed));
    }

    #[test]
    fn test_host_validated_forwards_from_observer() {
        let mut observer = recorder(Authority::Observer);
        let outcome = invoke(
            &mut observer,
            &CallContext::connection(ConnectionId(10)),
            fire(1),
        );
        assert_eq!(outcome, Ok(Outcome::Forwarded));
        assert!(observer.executed.is_empty());
        assert_eq!(observer.router.outbox_mut().drain_forwarded(), vec![fire(1)]);
    }

    #[test]
    fn test_owner_only_is_inert_for_foreign_instance() {
        let mut observer = recorder(Authority::Observer);
        let pull = RemoteCall::TriggerPull {
            shooter: PlayerId(2),
            origin: Vec3::ZERO,
            direction: Vec3::FORWARD,
        };

        let outcome = invoke(
            &mut observer,
            &CallContext::connection(ConnectionId(10)),
            pull.clone(),
        );
        assert_eq!(outcome, Ok(Outcome::Inert));

        let outcome = invoke(&mut observer, &CallContext::connection(ConnectionId(20)), pull);
        assert_eq!(outcome, Ok(Outcome::Executed));
        assert_eq!(observer.executed, vec![CallId::TriggerPull]);
    }

    #[test]
    fn test_fan_out_refused_on_observer() {
        let mut observer = recorder(Authority::Observer);
        let call = RemoteCall::SetHealth {
            player: PlayerId(1),
            health: 10,
        };
        let outcome = invoke(&mut observer, &CallContext::host(), call);
        assert!(matches!(
            outcome,
            Err(NetError::AuthorityViolation { .. })
        ));
    }

    #[test]
    fn test_remote_peer_cannot_inject_replication() {
        let mut host = recorder(Authority::Host);
        let call = RemoteCall::SetHealth {
            player: PlayerId(2),
            health: 1000,
        };
        let outcome = invoke(&mut host, &CallContext::connection(ConnectionId(20)), call);
        assert!(matches!(
            outcome,
            Err(NetError::AuthorityViolation { .. })
        ));
        assert!(host.executed.is_empty());
    }

    #[test]
    fn test_fan_out_reaches_every_connection_in_order() {
        let mut host = recorder(Authority::Host);
        host.router.outbox_mut().attach(ConnectionId(10));
        host.router.outbox_mut().attach(ConnectionId(20));

        for health in [90, 80] {
            let call = RemoteCall::SetHealth {
                player: PlayerId(1),
                health,
            };
            invoke(&mut host, &CallContext::host(), call).unwrap();
        }

        for connection in [ConnectionId(10), ConnectionId(20)] {
            let envelopes = host.router.outbox_mut().drain_for(connection);
            let seqs: Vec<u64> = envelopes.iter().map(|e| e.seq).collect();
            assert_eq!(seqs, vec![1, 2]);
            assert_eq!(
                envelopes[1].call,
                RemoteCall::SetHealth {
                    player: PlayerId(1),
                    health: 80
                }
            );
        }
    }

    #[test]
    fn test_targeted_reaches_only_addressee() {
        let mut host = recorder(Authority::Host);
        host.router.outbox_mut().attach(ConnectionId(10));
        host.router.outbox_mut().attach(ConnectionId(20));

        let call = RemoteCall::Relocate {
            connection: ConnectionId(20),
            player: PlayerId(2),
            position: Vec3::new(1.0, 0.0, 1.0),
        };
        invoke(&mut host, &CallContext::host(), call).unwrap();

        assert!(host.router.outbox_mut().drain_for(ConnectionId(10)).is_empty());
        assert_eq!(host.router.outbox_mut().drain_for(ConnectionId(20)).len(), 1);
    }

    #[test]
    fn test_targeted_to_unknown_connection_is_dropped() {
        let mut host = recorder(Authority::Host);
        let call = RemoteCall::Relocate {
            connection: ConnectionId(99),
            player: PlayerId(2),
            position: Vec3::ZERO,
        };

        // The host-side body still runs; only the replay is dropped.
        assert_eq!(
            invoke(&mut host, &CallContext::host(), call),
            Ok(Outcome::Executed)
        );
        assert_eq!(host.router.outbox().dropped(), 1);
    }

    #[test]
    fn test_missing_handler_is_unroutable() {
        let mut host = recorder(Authority::Host);
        let call = RemoteCall::PlayerLeft {
            player: PlayerId(1),
        };
        assert_eq!(
            invoke(&mut host, &CallContext::host(), call),
            Err(NetError::Unroutable(CallId::PlayerLeft))
        );
    }
}
