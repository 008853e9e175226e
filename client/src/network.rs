use crate::session::ClientSession;
use log::{debug, error, info, warn};
use shared::{NetError, Packet, RemoteCall, Vec3, PROTOCOL_VERSION, RECV_BUFFER_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What the headless client does once connected
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Position reported right after the handshake
    pub position: Vec3,
    /// Facing, also the shot direction
    pub aim: Vec3,
    /// Pull the trigger this often; `None` never fires
    pub fire_every: Option<Duration>,
    pub heartbeat: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            aim: Vec3::FORWARD,
            fire_every: None,
            heartbeat: Duration::from_secs(1),
        }
    }
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,
    session: ClientSession,
    options: ClientOptions,
}

impl Client {
    pub async fn new(server_addr: &str, options: ClientOptions) -> Result<Self, BoxError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            session: ClientSession::new(),
            options,
        })
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), BoxError> {
        info!("Connecting to {}...", self.server_addr);

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), BoxError> {
        let data = packet.encode()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends every call the session forwarded to the host
    async fn flush(&mut self) -> Result<(), BoxError> {
        for call in self.session.take_outgoing() {
            self.send_packet(&Packet::Call { call }).await?;
        }
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), BoxError> {
        match packet {
            Packet::Connected { connection, player } => {
                info!("Connected! {} as {}", connection, player);
                self.connected = true;
                self.session.set_identity(connection, player);
            }

            Packet::Replicate { seq, call } => {
                let was_synced = self.session.position().is_some();
                for call in self.session.receive(seq, call) {
                    self.report(&call);
                }

                // Report the starting transform once the initial state is in
                if !was_synced && self.session.position().is_some() {
                    if let Err(e) = self
                        .session
                        .move_to(self.options.position, self.options.aim)
                    {
                        warn!("Initial move refused: {}", e);
                    }
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.session.reset();
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }

        self.flush().await
    }

    fn report(&self, call: &RemoteCall) {
        let me = self.session.player();
        match call {
            RemoteCall::SetHealth { player, health } if Some(*player) == me => {
                info!("Health: {}", health)
            }
            RemoteCall::SetKills { player, kills } if Some(*player) == me => {
                info!("Kills: {}", kills)
            }
            RemoteCall::SetDeaths { player, deaths } if Some(*player) == me => {
                info!("Deaths: {}", deaths)
            }
            RemoteCall::PlayerJoined { player } => info!("{} joined", player.id),
            RemoteCall::PlayerLeft { player } => info!("{} left", player),
            other => debug!("Applied {:?}", other.id()),
        }
    }

    async fn pull_trigger(&mut self) -> Result<(), BoxError> {
        if !self.connected {
            return Ok(());
        }
        let origin = self.session.position().unwrap_or(self.options.position);
        match self.session.trigger_pull(origin, self.options.aim) {
            Ok(outcome) => debug!("Trigger pull: {:?}", outcome),
            Err(NetError::AuthorityViolation { reason, .. }) => {
                warn!("Trigger pull refused: {}", reason)
            }
            Err(e) => return Err(e.into()),
        }
        self.flush().await
    }

    /// Connects and plays until `limit` elapses, or forever without one.
    pub async fn run(&mut self, limit: Option<Duration>) -> Result<(), BoxError> {
        self.connect().await?;

        let mut heartbeat = interval(self.options.heartbeat);
        let fire_every = self.options.fire_every;
        let mut fire = interval(fire_every.unwrap_or(Duration::from_secs(1)));
        let deadline = sleep(limit.unwrap_or_default());
        tokio::pin!(deadline);

        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match Packet::decode(&buffer[..len]) {
                            Ok(packet) => {
                                if let Err(e) = self.handle_packet(packet).await {
                                    error!("Error handling packet: {}", e);
                                }
                            }
                            Err(e) => warn!("Dropping malformed packet: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = heartbeat.tick() => {
                    if self.connected {
                        self.session.maintain();
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                        if let Err(e) = self.flush().await {
                            error!("Error sending state sync request: {}", e);
                        }
                    }
                },

                _ = fire.tick(), if fire_every.is_some() => {
                    if let Err(e) = self.pull_trigger().await {
                        error!("Error firing: {}", e);
                    }
                },

                _ = &mut deadline, if limit.is_some() => {
                    info!("Time limit reached");
                    break;
                },
            }
        }

        if self.connected {
            self.send_packet(&Packet::Disconnect).await?;
        }

        Ok(())
    }
}
