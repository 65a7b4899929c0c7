//! WebSocket Game Server
//!
//! Async WebSocket server for two-player sessions.
//! Handles the upgrade handshake, per-connection message routing, idle
//! timeouts and graceful shutdown.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::state::{ConfigError, PlayerIdentity, SessionKey};
use crate::network::connection::ConnectionHandler;
use crate::network::protocol::{ProtocolError, ServerMessage};
use crate::network::registry::SessionRegistry;
use crate::network::repository::{NullRepository, SessionRepository};
use crate::network::session::{SessionConfig, SessionError};

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 64;

/// How long a closing connection may take to flush its queue.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close a connection that sends nothing for this long.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
    /// Configuration for new sessions.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            version: crate::VERSION.to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PONG_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PONG_BIND_ADDR") {
            self.bind_addr = parse_var("PONG_BIND_ADDR", raw)?;
        }
        if let Some(raw) = lookup("PONG_MAX_CONNECTIONS") {
            self.max_connections = parse_var("PONG_MAX_CONNECTIONS", raw)?;
        }
        if let Some(raw) = lookup("PONG_IDLE_TIMEOUT_SECS") {
            self.idle_timeout = Duration::from_secs(parse_var("PONG_IDLE_TIMEOUT_SECS", raw)?);
        }
        if let Some(raw) = lookup("PONG_TICK_RATE") {
            self.session.tick_rate = parse_var("PONG_TICK_RATE", raw)?;
        }
        if let Some(raw) = lookup("PONG_TICK_MODE") {
            self.session.tick_mode = parse_var("PONG_TICK_MODE", raw)?;
        }
        if let Some(raw) = lookup("PONG_START_POLICY") {
            self.session.start_policy = parse_var("PONG_START_POLICY", raw)?;
        }
        if let Some(raw) = lookup("PONG_POINTS_TO_WIN") {
            self.session.board.points_to_win = parse_var("PONG_POINTS_TO_WIN", raw)?;
        }
        if let Some(raw) = lookup("PONG_RNG_SEED") {
            self.session.rng_seed = Some(parse_var("PONG_RNG_SEED", raw)?);
        }
        Ok(self)
    }

    /// Check the whole configuration before serving.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue { name: "max_connections", value: "0".to_string() });
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue { name: "idle_timeout", value: "0".to_string() });
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value: raw })
}

// =============================================================================
// UPGRADE TARGET
// =============================================================================

/// Session key and optional identity taken from the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeTarget {
    /// Session to join.
    pub key: SessionKey,
    /// Externally supplied identity (`player_id` query parameter).
    pub identity: Option<PlayerIdentity>,
}

/// Upgrade request did not name a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// Path has no segments.
    #[error("missing session key in path")]
    MissingKey,
    /// Last path segment is not a UUID.
    #[error("invalid session key: {0}")]
    InvalidKey(String),
}

/// Pull the session key (last non-empty path segment) and `player_id` out of
/// an upgrade request, e.g. `/ws/game/<uuid>/?player_id=alice`.
pub fn parse_upgrade_target(path: &str, query: Option<&str>) -> Result<UpgradeTarget, TargetError> {
    let segment = path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .ok_or(TargetError::MissingKey)?;
    let key = segment
        .parse::<SessionKey>()
        .map_err(|_| TargetError::InvalidKey(segment.to_string()))?;

    let identity = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.strip_prefix("player_id="))
        .find(|v| !v.is_empty())
        .map(PlayerIdentity::new);

    Ok(UpgradeTarget { key, identity })
}

// =============================================================================
// SERVER
// =============================================================================

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Connected client state.
struct ConnectedClient {
    /// Session the client is seated in.
    key: SessionKey,
    /// Connection time.
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Live sessions.
    registry: Arc<SessionRegistry>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server that persists nothing.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_repository(config, Arc::new(NullRepository))
    }

    /// Create a new game server backed by a session repository.
    pub fn with_repository(config: ServerConfig, repository: Arc<dyn SessionRepository>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = SessionRegistry::with_repository(config.session.clone(), repository);

        Self {
            config,
            registry: Arc::new(registry),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        self.config.validate()?;
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Run on an already bound listener until shutdown.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server v{} listening on {}", self.config.version, listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("{}, rejecting {}", GameServerError::ConnectionLimitReached, addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let registry = self.registry.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut target = None;
            let callback = |request: &Request, response: Response| {
                match parse_upgrade_target(request.uri().path(), request.uri().query()) {
                    Ok(parsed) => {
                        target = Some(parsed);
                        Ok(response)
                    }
                    Err(e) => {
                        let mut rejection = ErrorResponse::new(Some(e.to_string()));
                        *rejection.status_mut() = StatusCode::BAD_REQUEST;
                        Err(rejection)
                    }
                }
            };

            let ws_stream = match accept_hdr_async(stream, callback).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let Some(target) = target else {
                return;
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

            let mut handler = ConnectionHandler::new(registry, target.key, target.identity, msg_tx.clone());
            if let Err(e) = handler.connect().await {
                info!("Closing {}: {}", addr, GameServerError::from(e));
                let _ = ws_sender.send(Message::Close(None)).await;
                return;
            }

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    key: target.key,
                    connected_at: Instant::now(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = tokio::time::timeout(idle_timeout, ws_receiver.next()) => {
                        match msg {
                            Err(_) => {
                                info!("Client {} idle for {:?}, closing", addr, idle_timeout);
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => {
                                handler.handle_text(&text).await;
                            }
                            Ok(Some(Ok(Message::Binary(_)))) => {
                                handler.reply_error(&ProtocolError::BinaryFrame).await;
                            }
                            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Ok(Some(Err(e))) => {
                                warn!("WebSocket error for {}: {}", addr, GameServerError::from(e));
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            message: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            handler.disconnect().await;
            drop(handler);
            drop(msg_tx);
            if tokio::time::timeout(FLUSH_TIMEOUT, sender_task).await.is_err() {
                debug!("Client {} did not drain in time", addr);
            }

            // Remove client
            {
                let mut clients = clients.write().await;
                if let Some(client) = clients.remove(&addr) {
                    info!(
                        "Client {} left session {} after {:?}",
                        addr,
                        client.key.short(),
                        client.connected_at.elapsed(),
                    );
                }
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get live session count.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::RejectReason;
    use crate::network::session::{StartPolicy, TickMode};

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.session.tick_rate, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars = BTreeMap::from([
            ("PONG_BIND_ADDR", "127.0.0.1:9000"),
            ("PONG_TICK_MODE", "on_input"),
            ("PONG_START_POLICY", "ready"),
            ("PONG_POINTS_TO_WIN", "5"),
            ("PONG_RNG_SEED", "99"),
            ("PONG_IDLE_TIMEOUT_SECS", "30"),
        ]);
        let config = ServerConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.session.tick_mode, TickMode::OnInput);
        assert_eq!(config.session.start_policy, StartPolicy::Ready);
        assert_eq!(config.session.board.points_to_win, 5);
        assert_eq!(config.session.rng_seed, Some(99));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_connections, 1000);
    }

    #[test]
    fn test_bad_env_value() {
        let err = ServerConfig::default()
            .with_overrides(|name| (name == "PONG_TICK_RATE").then(|| "fast".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue { name: "PONG_TICK_RATE", value: "fast".to_string() }
        );

        let config = ServerConfig::default()
            .with_overrides(|name| (name == "PONG_POINTS_TO_WIN").then(|| "0".to_string()))
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_upgrade_target() {
        let key = SessionKey::new_v4();

        let target = parse_upgrade_target(&format!("/ws/game/{}/", key), None).unwrap();
        assert_eq!(target.key, key);
        assert_eq!(target.identity, None);

        let target = parse_upgrade_target(
            &format!("/ws/game/{}", key),
            Some("foo=1&player_id=alice"),
        ).unwrap();
        assert_eq!(target.identity, Some(PlayerIdentity::new("alice")));

        let target = parse_upgrade_target(&format!("/{}", key), Some("player_id=")).unwrap();
        assert_eq!(target.identity, None);
    }

    #[test]
    fn test_parse_upgrade_target_rejects() {
        assert_eq!(parse_upgrade_target("/", None), Err(TargetError::MissingKey));
        assert_eq!(
            parse_upgrade_target("/ws/game/lobby/", None),
            Err(TargetError::InvalidKey("lobby".to_string()))
        );
    }

    #[test]
    fn test_rejected_join_reports_session_error() {
        let err = GameServerError::from(SessionError::Rejected(RejectReason::Full));
        assert!(matches!(err, GameServerError::Session(_)));
        assert!(err.to_string().starts_with("Session error: Slot request rejected"));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = Arc::new(GameServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = server.clone();
        let task = tokio::spawn(async move { running.run_with_listener(listener).await });
        // Let the accept loop subscribe to the shutdown signal
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }
}
