//! Lobby actor, connection tasks and the TCP accept loop.
//!
//! One task owns the [`Lobby`] and applies commands from an mpsc channel in
//! arrival order; replies travel back on oneshot channels. Every accepted
//! connection gets its own task that performs the handshake, forwards client
//! messages to the actor and writes the connection's outbound queue to the
//! socket. A connection task never touches game state directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep_until, timeout, Duration, Instant, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::game::{Perspective, SessionView};
use crate::lobby::Lobby;
use crate::persistence::{FileStore, MemoryStore, PersistedSession, SnapshotStore, StoreError};
use crate::protocol::{JoinRequest, Message, Rejection, Welcome, PROTOCOL_VERSION};
use crate::session::{ConnectionHandle, ConnectionId};
use crate::transport::{InMemoryTransport, TcpTransport, Transport};

/// How often the actor checks the reconnection grace, turn clock and rematch deadline.
const EXPIRY_TICK: Duration = Duration::from_secs(1);

const COMMAND_QUEUE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("lobby actor is no longer running")]
    Unavailable,
}

enum LobbyCommand {
    Join {
        connection: ConnectionHandle,
        request: JoinRequest,
        reply: oneshot::Sender<Result<Welcome, Rejection>>,
    },
    Action {
        connection: ConnectionId,
        msg: Message,
    },
    Disconnect {
        connection: ConnectionId,
    },
    View {
        perspective: Perspective,
        reply: oneshot::Sender<SessionView>,
    },
    Shutdown,
}

/// Cheap, cloneable handle to the running lobby actor.
#[derive(Clone)]
pub struct LobbyHandle {
    sender: mpsc::Sender<LobbyCommand>,
}

impl LobbyHandle {
    /// Start the actor. Snapshots go to `store` under `session_id` after
    /// every command that changed state.
    pub fn spawn(
        lobby: Lobby,
        store: Arc<dyn SnapshotStore>,
        session_id: String,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE);
        let actor = LobbyActor {
            lobby,
            store,
            session_id,
            receiver,
        };
        let task = tokio::spawn(actor.run());
        (Self { sender }, task)
    }

    async fn send(&self, cmd: LobbyCommand) -> Result<(), LobbyError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| LobbyError::Unavailable)
    }

    pub async fn join(
        &self,
        connection: ConnectionHandle,
        request: JoinRequest,
    ) -> Result<Result<Welcome, Rejection>, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::Join {
            connection,
            request,
            reply,
        })
        .await?;
        rx.await.map_err(|_| LobbyError::Unavailable)
    }

    /// Forward a client message (fire-and-forget; replies arrive on the
    /// connection's queue).
    pub async fn submit(&self, connection: ConnectionId, msg: Message) -> Result<(), LobbyError> {
        self.send(LobbyCommand::Action { connection, msg }).await
    }

    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), LobbyError> {
        self.send(LobbyCommand::Disconnect { connection }).await
    }

    pub async fn view(&self, perspective: Perspective) -> Result<SessionView, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::View { perspective, reply }).await?;
        rx.await.map_err(|_| LobbyError::Unavailable)
    }

    pub async fn shutdown(&self) -> Result<(), LobbyError> {
        self.send(LobbyCommand::Shutdown).await
    }
}

struct LobbyActor {
    lobby: Lobby,
    store: Arc<dyn SnapshotStore>,
    session_id: String,
    receiver: mpsc::Receiver<LobbyCommand>,
}

impl LobbyActor {
    async fn run(mut self) {
        log::info!("lobby actor started for session {}", self.session_id);
        let mut expiry = interval(EXPIRY_TICK);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(LobbyCommand::Shutdown) => {
                        self.lobby.close();
                        break;
                    }
                    None => break,
                    Some(cmd) => self.apply(cmd),
                },
                _ = expiry.tick() => self.lobby.expire(std::time::Instant::now()),
            }
            self.persist().await;
        }
        log::info!("lobby actor stopped");
    }

    fn apply(&mut self, cmd: LobbyCommand) {
        match cmd {
            LobbyCommand::Join {
                connection,
                request,
                reply,
            } => {
                let result = self.lobby.join(connection, request);
                let _ = reply.send(result);
            }
            LobbyCommand::Action { connection, msg } => self.lobby.handle(connection, msg),
            LobbyCommand::Disconnect { connection } => self.lobby.disconnect(connection),
            LobbyCommand::View { perspective, reply } => {
                let _ = reply.send(self.lobby.view(perspective));
            }
            LobbyCommand::Shutdown => {}
        }
    }

    async fn persist(&mut self) {
        if !self.lobby.take_dirty() {
            return;
        }
        let bytes = match self.lobby.persisted().encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("could not encode snapshot: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.save(&self.session_id, bytes).await {
            log::warn!("could not save snapshot for {}: {}", self.session_id, e);
        }
    }
}

/// Build the lobby for `config`, resuming from `store` when a snapshot exists.
pub async fn load_lobby(store: &dyn SnapshotStore, config: &ServerConfig) -> anyhow::Result<Lobby> {
    let lobby = match store.load(&config.session_id).await {
        Ok(bytes) => {
            let persisted = PersistedSession::decode(&bytes)?;
            Lobby::restore(persisted, config.reconnect_grace)
        }
        Err(StoreError::NotFound(_)) => {
            log::info!("no saved state for session {}; starting fresh", config.session_id);
            Lobby::new(config.game.clone(), config.reconnect_grace)
        }
        Err(e) => return Err(e.into()),
    };
    Ok(lobby
        .with_turn_timeout(config.turn_timeout)
        .with_rematch_timeout(config.rematch_timeout))
}

/// Timing and buffering for one connection task.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub queue_depth: usize,
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            idle_timeout: config.idle_timeout,
            queue_depth: config.spectator_buffer.max(1),
        }
    }
}

/// Run one client connection until either side closes it.
pub async fn serve_connection<T: Transport>(
    mut transport: T,
    id: ConnectionId,
    lobby: LobbyHandle,
    settings: ConnectionSettings,
) {
    match drive_connection(&mut transport, id, &lobby, settings).await {
        Ok(()) => log::info!("{} closed", id),
        Err(e) => log::info!("{} dropped: {}", id, e),
    }
    let _ = lobby.disconnect(id).await;
}

async fn handshake<T: Transport>(transport: &mut T, idle_timeout: Duration) -> anyhow::Result<()> {
    let first = timeout(idle_timeout, transport.recv())
        .await
        .map_err(|_| anyhow::anyhow!("no handshake within {:?}", idle_timeout))??;
    match first {
        Message::Handshake { version } if version == PROTOCOL_VERSION => {
            transport
                .send(Message::HandshakeAck {
                    version: PROTOCOL_VERSION,
                })
                .await
        }
        Message::Handshake { version } => {
            let _ = transport
                .send(Message::HandshakeAck {
                    version: PROTOCOL_VERSION,
                })
                .await;
            Err(anyhow::anyhow!(
                "Protocol version mismatch in Handshake: expected {}, got {}",
                PROTOCOL_VERSION,
                version
            ))
        }
        other => Err(anyhow::anyhow!(
            "Expected Handshake, got {} (closing session)",
            other.kind()
        )),
    }
}

async fn drive_connection<T: Transport>(
    transport: &mut T,
    id: ConnectionId,
    lobby: &LobbyHandle,
    settings: ConnectionSettings,
) -> anyhow::Result<()> {
    handshake(transport, settings.idle_timeout).await?;

    let (tx, mut outbox) = mpsc::channel(settings.queue_depth);
    // Held until a join succeeds, so refused joins leave the connection open
    // for another attempt. Afterwards only the lobby holds a sender and the
    // queue closes when the lobby releases this connection.
    let mut own_tx = Some(tx);
    let mut heartbeat = interval_at(
        Instant::now() + settings.heartbeat_interval,
        settings.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        let idle_deadline = last_seen + settings.idle_timeout;
        tokio::select! {
            inbound = transport.recv() => {
                let msg = inbound?;
                last_seen = Instant::now();
                match msg {
                    Message::Heartbeat { .. } => {}
                    Message::Join(request) if own_tx.is_some() => {
                        if let Some(tx) = own_tx.clone() {
                            let handle = ConnectionHandle::new(id, tx);
                            if lobby.join(handle, request).await?.is_ok() {
                                own_tx = None;
                            }
                        }
                    }
                    other if own_tx.is_none() => lobby.submit(id, other).await?,
                    other => {
                        log::debug!("{} sent {} before joining", id, other.kind());
                        transport.send(Message::Rejected(Rejection::NotJoined)).await?;
                    }
                }
            }
            queued = outbox.recv() => match queued {
                Some(msg) => transport.send(msg).await?,
                None => return Ok(()),
            },
            _ = heartbeat.tick() => {
                transport.send(Message::Heartbeat { version: PROTOCOL_VERSION }).await?;
            }
            _ = sleep_until(idle_deadline) => {
                return Err(anyhow::anyhow!("Connection idle timeout exceeded ({:?})", settings.idle_timeout));
            }
        }
    }
}

/// A running game server: the lobby actor plus whatever listeners feed it.
pub struct Server {
    config: ServerConfig,
    lobby: LobbyHandle,
    actor: JoinHandle<()>,
    next_connection: Arc<AtomicU64>,
}

impl Server {
    /// Start with the store implied by `config.state_dir`.
    pub async fn start(config: ServerConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn SnapshotStore> = match &config.state_dir {
            Some(dir) => Arc::new(FileStore::new(dir.clone())),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: ServerConfig, store: Arc<dyn SnapshotStore>) -> anyhow::Result<Self> {
        config.validate()?;
        let lobby = load_lobby(store.as_ref(), &config).await?;
        let (handle, actor) = LobbyHandle::spawn(lobby, store, config.session_id.clone());
        Ok(Self {
            config,
            lobby: handle,
            actor,
            next_connection: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn lobby(&self) -> LobbyHandle {
        self.lobby.clone()
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach an in-process client. Returns the client's end of the pipe.
    pub fn connect_in_memory(&self) -> InMemoryTransport {
        let (client, server) = InMemoryTransport::pair();
        let id = self.next_id();
        tokio::spawn(serve_connection(
            server,
            id,
            self.lobby.clone(),
            ConnectionSettings::from(&self.config),
        ));
        client
    }

    /// Accept TCP clients until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        log::info!("listening on {}", listener.local_addr()?);
        let settings = ConnectionSettings::from(&self.config);
        loop {
            let (stream, addr) = listener.accept().await?;
            let id = self.next_id();
            log::info!("{} accepted from {}", id, addr);
            let transport = TcpTransport::with_config(
                stream,
                settings.idle_timeout,
                self.config.max_frame_size,
            );
            tokio::spawn(serve_connection(transport, id, self.lobby.clone(), settings));
        }
    }

    /// Stop the lobby actor after it saves its final state.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.lobby.shutdown().await?;
        self.actor.await?;
        Ok(())
    }
}
