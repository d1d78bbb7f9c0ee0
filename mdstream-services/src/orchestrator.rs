//! Session Orchestrator
//!
//! Owns the token source and every session. A periodic liveness tick renews
//! the token when it is due, pushes renewed tokens to each session exactly
//! once and sends `Connect` to sessions waiting to reconnect.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mdstream_core::{AuthError, DiscoveryError, Endpoint, EndpointSource, Token, TokenSource};
use mdstream_session::{ReconnectMode, SessionControl, SessionState};

use crate::spawner::SessionSpawner;

/// Default liveness tick period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Endpoint discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Expected {required} configured endpoint(s) but found {found}")]
    NoEndpoints { required: usize, found: usize },

    #[error("All sessions have failed")]
    AllSessionsFailed,

    #[error("Orchestrator has not been started")]
    NotStarted,
}

/// Configuration for SessionOrchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub region: String,
    pub hotstandby: bool,
    /// Endpoints to use instead of service discovery
    pub endpoints: Vec<Endpoint>,
    pub tick_interval: Duration,
    /// Consecutive recoverable refresh failures tolerated before giving up
    pub max_consecutive_refresh_failures: u32,
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            hotstandby: false,
            endpoints: Vec::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_consecutive_refresh_failures: 5,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-session bookkeeping
struct ManagedSession<S> {
    session: S,
    /// Disconnect count at the time the last `Connect` was sent
    connect_sent_at: Option<u64>,
    /// Newest token generation handed to the session
    delivered_generation: u64,
}

pub struct SessionOrchestrator<T, E, S>
where
    T: TokenSource,
    E: EndpointSource,
    S: SessionSpawner,
{
    config: OrchestratorConfig,
    tokens: T,
    endpoints: E,
    spawner: S,
    token: Option<Arc<Token>>,
    sessions: Vec<ManagedSession<S::Session>>,
    refresh_failures: u32,
}

impl<T, E, S> SessionOrchestrator<T, E, S>
where
    T: TokenSource,
    E: EndpointSource,
    S: SessionSpawner,
{
    pub fn new(config: OrchestratorConfig, tokens: T, endpoints: E, spawner: S) -> Self {
        Self {
            config,
            tokens,
            endpoints,
            spawner,
            token: None,
            sessions: Vec::new(),
            refresh_failures: 0,
        }
    }

    /// Token currently held
    pub fn token(&self) -> Option<&Arc<Token>> {
        self.token.as_ref()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &S::Session> {
        self.sessions.iter().map(|m| &m.session)
    }

    /// Authenticate, select endpoints and connect one session per endpoint
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        info!(
            "[Orchestrator] Starting {} session(s) in region {}",
            if self.config.hotstandby { "hot-standby" } else { "single" },
            self.config.region
        );

        let token = self.tokens.authenticate().await?;
        self.token = Some(Arc::clone(&token));

        let endpoints = self.select_endpoints(&token).await?;
        for (index, endpoint) in endpoints.into_iter().enumerate() {
            let name = format!("session{}", index + 1);
            info!("[Orchestrator] Spawning {} for {}", name, endpoint);
            let session = self.spawner.spawn(&name, endpoint);
            self.sessions.push(ManagedSession {
                session,
                connect_sent_at: None,
                delivered_generation: 0,
            });
        }

        for managed in &mut self.sessions {
            let disconnects = managed.session.status().disconnects;
            Self::send_connect(managed, &token, disconnects).await;
        }
        Ok(())
    }

    async fn select_endpoints(&self, token: &Token) -> Result<Vec<Endpoint>, OrchestratorError> {
        let required = if self.config.hotstandby { 2 } else { 1 };

        let mut endpoints = if self.config.endpoints.is_empty() {
            self.endpoints
                .resolve(token, &self.config.region, self.config.hotstandby)
                .await?
        } else {
            info!("[Orchestrator] Using configured endpoints; skipping discovery");
            self.config.endpoints.clone()
        };

        if endpoints.len() < required {
            return Err(OrchestratorError::NoEndpoints {
                required,
                found: endpoints.len(),
            });
        }
        endpoints.truncate(required);
        Ok(endpoints)
    }

    /// One liveness pass
    pub async fn tick(&mut self, now: Instant) -> Result<(), OrchestratorError> {
        let mut token = self.token.clone().ok_or(OrchestratorError::NotStarted)?;

        if self.tokens.time_until_refresh_due(&token, now).is_zero() {
            debug!("[Orchestrator] Token generation {} due for renewal", token.generation());
            if let Some(renewed) = self.refresh(&token).await? {
                token = renewed;
                self.push_token(&token).await;
            }
        }

        for index in 0..self.sessions.len() {
            let status = self.sessions[index].session.status();
            let managed = &self.sessions[index];
            if status.state != SessionState::Reconnecting
                || managed.session.reconnect_mode() != ReconnectMode::Orchestrated
                || managed.connect_sent_at == Some(status.disconnects)
            {
                continue;
            }

            if !token.is_fresh(now) {
                info!("[Orchestrator] Token expired; renewing before reconnect");
                match self.refresh(&token).await? {
                    Some(renewed) => {
                        token = renewed;
                        self.push_token(&token).await;
                    }
                    None => continue,
                }
            }

            Self::send_connect(&mut self.sessions[index], &token, status.disconnects).await;
        }

        if !self.sessions.is_empty() && self.sessions.iter().all(|m| m.session.status().has_failed()) {
            error!("[Orchestrator] Every session has closed");
            return Err(OrchestratorError::AllSessionsFailed);
        }
        Ok(())
    }

    /// Renew the token. `Ok(None)` is a recoverable failure still within budget.
    async fn refresh(&mut self, token: &Token) -> Result<Option<Arc<Token>>, OrchestratorError> {
        match self.tokens.refresh(token).await {
            Ok(renewed) => {
                self.refresh_failures = 0;
                info!("[Orchestrator] Token renewed (generation {})", renewed.generation());
                self.token = Some(Arc::clone(&renewed));
                Ok(Some(renewed))
            }
            Err(e) if e.is_terminal() => {
                error!("[Orchestrator] Token renewal failed: {}", e);
                Err(e.into())
            }
            Err(e) => {
                self.refresh_failures += 1;
                warn!(
                    "[Orchestrator] Token renewal failed ({}/{}): {}",
                    self.refresh_failures, self.config.max_consecutive_refresh_failures, e
                );
                if self.refresh_failures >= self.config.max_consecutive_refresh_failures {
                    return Err(e.into());
                }
                Ok(None)
            }
        }
    }

    /// Deliver `token` to every session that has not received it yet
    async fn push_token(&mut self, token: &Arc<Token>) {
        for managed in &mut self.sessions {
            if managed.delivered_generation >= token.generation() {
                continue;
            }
            if !managed.session.status().state.accepts_tokens() {
                continue;
            }
            match managed.session.push_token(Arc::clone(token)).await {
                Ok(()) => managed.delivered_generation = token.generation(),
                Err(e) => warn!("[Orchestrator] {}", e),
            }
        }
    }

    async fn send_connect(managed: &mut ManagedSession<S::Session>, token: &Arc<Token>, disconnects: u64) {
        info!(
            "[Orchestrator] Connecting {} to {}",
            managed.session.name(),
            managed.session.endpoint()
        );
        match managed.session.connect(Arc::clone(token)).await {
            Ok(()) => {
                managed.connect_sent_at = Some(disconnects);
                managed.delivered_generation = managed.delivered_generation.max(token.generation());
            }
            Err(e) => warn!("[Orchestrator] {}", e),
        }
    }

    /// Tick until `cancel` fires or a fatal error occurs, then shut down
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), OrchestratorError> {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Orchestrator] Shutdown requested");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Instant::now()).await {
                        error!("[Orchestrator] Fatal: {}", e);
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown().await;
        result
    }

    /// Disconnect every session and wait for their tasks
    pub async fn shutdown(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        info!("[Orchestrator] Shutting down {} session(s)", self.sessions.len());
        for mut managed in self.sessions.drain(..) {
            managed.session.shutdown(self.config.shutdown_timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mdstream_core::{AuthResult, DiscoveryResult, RefreshPolicy};
    use mdstream_session::{CloseReason, SessionError, SessionStatus};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<(String, &'static str, u64)>>>;

    const TTL: Duration = Duration::from_secs(3600);

    struct FakeTokens {
        generation: u64,
        refreshes: Arc<Mutex<u32>>,
        /// `None` never schedules a renewal
        policy: Option<RefreshPolicy>,
        refresh_error: Option<AuthError>,
        log: Log,
    }

    impl FakeTokens {
        fn new(log: &Log) -> Self {
            Self {
                generation: 0,
                refreshes: Arc::new(Mutex::new(0)),
                policy: Some(RefreshPolicy::default()),
                refresh_error: None,
                log: Arc::clone(log),
            }
        }

        fn issue(&mut self) -> Arc<Token> {
            self.generation += 1;
            Arc::new(Token::new(
                format!("access-{}", self.generation),
                Some("refresh".to_string()),
                Instant::now(),
                TTL,
                self.generation,
            ))
        }
    }

    #[async_trait]
    impl TokenSource for FakeTokens {
        async fn authenticate(&mut self) -> AuthResult<Arc<Token>> {
            Ok(self.issue())
        }

        async fn refresh(&mut self, _token: &Token) -> AuthResult<Arc<Token>> {
            *self.refreshes.lock().unwrap() += 1;
            if let Some(e) = &self.refresh_error {
                return Err(e.clone());
            }
            let token = self.issue();
            self.log
                .lock()
                .unwrap()
                .push(("tokens".to_string(), "refresh", token.generation()));
            Ok(token)
        }

        fn time_until_refresh_due(&self, token: &Token, now: Instant) -> Duration {
            match &self.policy {
                Some(policy) => policy.time_until_refresh_due(token, now),
                None => Duration::MAX,
            }
        }
    }

    struct FakeEndpoints {
        endpoints: Vec<Endpoint>,
        error: Option<DiscoveryError>,
    }

    #[async_trait]
    impl EndpointSource for FakeEndpoints {
        async fn resolve(&self, _token: &Token, _region: &str, hotstandby: bool) -> DiscoveryResult<Vec<Endpoint>> {
            if let Some(e) = &self.error {
                return Err(e.clone());
            }
            let count = if hotstandby { self.endpoints.len() } else { 1 };
            Ok(self.endpoints.iter().take(count).cloned().collect())
        }
    }

    fn discovered() -> FakeEndpoints {
        FakeEndpoints {
            endpoints: vec![Endpoint::explicit("a", 443), Endpoint::explicit("b", 443)],
            error: None,
        }
    }

    struct FakeSession {
        name: String,
        endpoint: Endpoint,
        mode: ReconnectMode,
        status: Arc<Mutex<SessionStatus>>,
        log: Log,
    }

    impl FakeSession {
        fn record(&self, what: &'static str, generation: u64) {
            self.log.lock().unwrap().push((self.name.clone(), what, generation));
        }
    }

    #[async_trait]
    impl SessionControl for FakeSession {
        fn name(&self) -> &str {
            &self.name
        }

        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        fn reconnect_mode(&self) -> ReconnectMode {
            self.mode
        }

        fn status(&self) -> SessionStatus {
            self.status.lock().unwrap().clone()
        }

        async fn connect(&self, token: Arc<Token>) -> Result<(), SessionError> {
            self.record("connect", token.generation());
            Ok(())
        }

        async fn push_token(&self, token: Arc<Token>) -> Result<(), SessionError> {
            self.record("push", token.generation());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), SessionError> {
            self.record("disconnect", 0);
            Ok(())
        }

        async fn shutdown(&mut self, _timeout: Duration) {
            self.record("shutdown", 0);
        }
    }

    struct FakeSpawner {
        mode: ReconnectMode,
        statuses: Arc<Mutex<Vec<Arc<Mutex<SessionStatus>>>>>,
        log: Log,
    }

    impl SessionSpawner for FakeSpawner {
        type Session = FakeSession;

        fn spawn(&mut self, name: &str, endpoint: Endpoint) -> FakeSession {
            let status = Arc::new(Mutex::new(SessionStatus {
                state: SessionState::Subscribed,
                ..SessionStatus::default()
            }));
            self.statuses.lock().unwrap().push(Arc::clone(&status));
            FakeSession {
                name: name.to_string(),
                endpoint,
                mode: self.mode,
                status,
                log: Arc::clone(&self.log),
            }
        }
    }

    struct Harness {
        orchestrator: SessionOrchestrator<FakeTokens, FakeEndpoints, FakeSpawner>,
        statuses: Arc<Mutex<Vec<Arc<Mutex<SessionStatus>>>>>,
        refreshes: Arc<Mutex<u32>>,
        log: Log,
    }

    impl Harness {
        fn new(config: OrchestratorConfig, tokens: impl FnOnce(&mut FakeTokens), endpoints: FakeEndpoints) -> Self {
            let log: Log = Arc::new(Mutex::new(Vec::new()));
            let statuses = Arc::new(Mutex::new(Vec::new()));
            let mut fake_tokens = FakeTokens::new(&log);
            tokens(&mut fake_tokens);
            let refreshes = Arc::clone(&fake_tokens.refreshes);
            let spawner = FakeSpawner {
                mode: ReconnectMode::Orchestrated,
                statuses: Arc::clone(&statuses),
                log: Arc::clone(&log),
            };
            Self {
                orchestrator: SessionOrchestrator::new(config, fake_tokens, endpoints, spawner),
                statuses,
                refreshes,
                log,
            }
        }

        fn set_status(&self, index: usize, state: SessionState, disconnects: u64, last_close: Option<CloseReason>) {
            let statuses = self.statuses.lock().unwrap();
            let mut status = statuses[index].lock().unwrap();
            status.state = state;
            status.disconnects = disconnects;
            status.last_close = last_close;
        }

        fn entries(&self, what: &str) -> Vec<(String, u64)> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, w, _)| *w == what)
                .map(|(name, _, generation)| (name.clone(), *generation))
                .collect()
        }

        fn refreshes(&self) -> u32 {
            *self.refreshes.lock().unwrap()
        }

        fn clear_log(&self) {
            self.log.lock().unwrap().clear();
        }
    }

    fn hotstandby() -> OrchestratorConfig {
        OrchestratorConfig {
            hotstandby: true,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_single_session() {
        let mut h = Harness::new(OrchestratorConfig::default(), |_| {}, discovered());
        h.orchestrator.start().await.unwrap();

        assert_eq!(h.entries("connect"), vec![("session1".to_string(), 1)]);
        assert_eq!(h.orchestrator.sessions().count(), 1);
        assert_eq!(h.orchestrator.sessions().next().unwrap().endpoint().host, "a");
    }

    #[tokio::test]
    async fn test_start_hotstandby_pair() {
        let mut h = Harness::new(hotstandby(), |_| {}, discovered());
        h.orchestrator.start().await.unwrap();

        assert_eq!(
            h.entries("connect"),
            vec![("session1".to_string(), 1), ("session2".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_configured_endpoints_bypass_discovery() {
        let endpoints = FakeEndpoints {
            endpoints: Vec::new(),
            error: Some(DiscoveryError::Forbidden { status: 403 }),
        };
        let config = OrchestratorConfig {
            endpoints: vec![Endpoint::explicit("localhost", 15000)],
            ..OrchestratorConfig::default()
        };
        let mut h = Harness::new(config, |_| {}, endpoints);
        h.orchestrator.start().await.unwrap();
        assert_eq!(h.orchestrator.sessions().next().unwrap().endpoint().port, 15000);
    }

    #[tokio::test]
    async fn test_hotstandby_needs_two_configured_endpoints() {
        let config = OrchestratorConfig {
            endpoints: vec![Endpoint::explicit("localhost", 15000)],
            ..hotstandby()
        };
        let mut h = Harness::new(config, |_| {}, discovered());
        let err = h.orchestrator.start().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoEndpoints { required: 2, found: 1 }));
    }

    #[tokio::test]
    async fn test_discovery_failure_is_reported() {
        let endpoints = FakeEndpoints {
            endpoints: Vec::new(),
            error: Some(DiscoveryError::InsufficientEndpoints {
                required: 2,
                found: 1,
                region: "us-east-1".to_string(),
            }),
        };
        let mut h = Harness::new(hotstandby(), |_| {}, endpoints);
        let err = h.orchestrator.start().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Discovery(DiscoveryError::InsufficientEndpoints { .. })));
    }

    #[tokio::test]
    async fn test_tick_before_start() {
        let mut h = Harness::new(OrchestratorConfig::default(), |_| {}, discovered());
        let err = h.orchestrator.tick(Instant::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_at_margin_reaches_both_sessions_once() {
        let mut h = Harness::new(hotstandby(), |_| {}, discovered());
        h.orchestrator.start().await.unwrap();
        h.clear_log();

        tokio::time::advance(Duration::from_secs(3239)).await;
        h.orchestrator.tick(Instant::now()).await.unwrap();
        assert_eq!(h.refreshes(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        h.orchestrator.tick(Instant::now()).await.unwrap();
        assert_eq!(h.refreshes(), 1);
        assert_eq!(
            h.entries("push"),
            vec![("session1".to_string(), 2), ("session2".to_string(), 2)]
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        h.orchestrator.tick(Instant::now()).await.unwrap();
        assert_eq!(h.refreshes(), 1);
        assert_eq!(h.entries("push").len(), 2);
        assert_eq!(h.orchestrator.token().unwrap().generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_renewed_before_reconnect() {
        let mut h = Harness::new(OrchestratorConfig::default(), |t| t.policy = None, discovered());
        h.orchestrator.start().await.unwrap();
        h.clear_log();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        h.set_status(0, SessionState::Reconnecting, 1, Some(CloseReason::Transport("reset".to_string())));
        h.orchestrator.tick(Instant::now()).await.unwrap();

        assert_eq!(h.refreshes(), 1);
        let log = h.log.lock().unwrap().clone();
        let refresh_at = log.iter().position(|(_, w, _)| *w == "refresh").unwrap();
        let connect_at = log.iter().position(|(_, w, _)| *w == "connect").unwrap();
        assert!(refresh_at < connect_at);
        assert_eq!(log[connect_at], ("session1".to_string(), "connect", 2));
    }

    #[tokio::test]
    async fn test_connect_sent_once_per_disconnect() {
        let mut h = Harness::new(OrchestratorConfig::default(), |t| t.policy = None, discovered());
        h.orchestrator.start().await.unwrap();
        h.clear_log();

        h.set_status(0, SessionState::Reconnecting, 1, Some(CloseReason::HeartbeatTimeout));
        h.orchestrator.tick(Instant::now()).await.unwrap();
        h.orchestrator.tick(Instant::now()).await.unwrap();
        assert_eq!(h.entries("connect"), vec![("session1".to_string(), 1)]);

        h.set_status(0, SessionState::Reconnecting, 2, Some(CloseReason::HeartbeatTimeout));
        h.orchestrator.tick(Instant::now()).await.unwrap();
        assert_eq!(h.entries("connect").len(), 2);
    }

    #[tokio::test]
    async fn test_autonomous_sessions_are_not_reconnected() {
        let mut h = Harness::new(OrchestratorConfig::default(), |t| t.policy = None, discovered());
        h.orchestrator.spawner.mode = ReconnectMode::Autonomous;
        h.orchestrator.start().await.unwrap();
        h.clear_log();

        h.set_status(0, SessionState::Reconnecting, 1, Some(CloseReason::HeartbeatTimeout));
        h.orchestrator.tick(Instant::now()).await.unwrap();
        assert!(h.entries("connect").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_refresh_error_is_fatal() {
        let mut h = Harness::new(
            OrchestratorConfig::default(),
            |t| {
                t.refresh_error = Some(AuthError::InvalidCredential {
                    status: 401,
                    body: String::new(),
                })
            },
            discovered(),
        );
        h.orchestrator.start().await.unwrap();

        tokio::time::advance(Duration::from_secs(3300)).await;
        let err = h.orchestrator.tick(Instant::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Auth(AuthError::InvalidCredential { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_refresh_errors_are_bounded() {
        let config = OrchestratorConfig {
            max_consecutive_refresh_failures: 3,
            ..OrchestratorConfig::default()
        };
        let mut h = Harness::new(
            config,
            |t| t.refresh_error = Some(AuthError::transport("connection reset")),
            discovered(),
        );
        h.orchestrator.start().await.unwrap();

        tokio::time::advance(Duration::from_secs(3300)).await;
        h.orchestrator.tick(Instant::now()).await.unwrap();
        h.orchestrator.tick(Instant::now()).await.unwrap();
        let err = h.orchestrator.tick(Instant::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Auth(AuthError::Transport(_))));
        assert_eq!(h.refreshes(), 3);
    }

    #[tokio::test]
    async fn test_all_sessions_failed() {
        let mut h = Harness::new(hotstandby(), |t| t.policy = None, discovered());
        h.orchestrator.start().await.unwrap();

        let rejected = Some(CloseReason::LoginRejected("Not entitled".to_string()));
        h.set_status(0, SessionState::Closed, 0, rejected.clone());
        h.orchestrator.tick(Instant::now()).await.unwrap();

        h.set_status(1, SessionState::Closed, 0, rejected);
        let err = h.orchestrator.tick(Instant::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AllSessionsFailed));
    }

    #[tokio::test]
    async fn test_run_shuts_down_on_cancel() {
        let mut h = Harness::new(hotstandby(), |t| t.policy = None, discovered());
        h.orchestrator.start().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        h.orchestrator.run(cancel).await.unwrap();

        assert_eq!(h.entries("shutdown").len(), 2);
        assert_eq!(h.orchestrator.sessions().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_shuts_down_on_fatal_error() {
        let mut h = Harness::new(OrchestratorConfig::default(), |t| t.policy = None, discovered());
        h.orchestrator.start().await.unwrap();
        h.set_status(0, SessionState::Closed, 0, Some(CloseReason::LoginRejected("denied".to_string())));

        let err = h.orchestrator.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AllSessionsFailed));
        assert_eq!(h.entries("shutdown").len(), 1);
    }
}
