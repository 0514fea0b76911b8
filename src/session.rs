use crate::client::{ClientEvent, ClientFactory, ProtocolClient};
use crate::dedup::DedupCache;
use crate::pipeline::{self, PipelineContext};
use crate::qr::QrStore;
use crate::relay::WebhookRelay;
use crate::types::{GroupInfo, SessionStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const CONNECTED_STATE: &str = "CONNECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    QrPending,
    Authenticating,
    Connected,
    Disconnected,
    Error,
}

/// One user's live association with a protocol-client handle.
pub struct Session {
    pub user_id: String,
    client: Arc<dyn ProtocolClient>,
    state: Mutex<SessionState>,
    last_error: Mutex<Option<String>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(user_id: &str, client: Arc<dyn ProtocolClient>) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.to_string(),
            client,
            state: Mutex::new(SessionState::Uninitialized),
            last_error: Mutex::new(None),
            event_task: Mutex::new(None),
        })
    }

    pub fn lifecycle(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn set_error(&self, message: String) {
        self.set_state(SessionState::Error);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }

    fn abort_event_task(&self) {
        if let Some(handle) = self
            .event_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("client not initialized for this user")]
    NotInitialized,
    #[error("logout failed: {0}")]
    Logout(#[source] anyhow::Error),
    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

/// Keyed collection of sessions, one per user id. All registry maps are
/// guarded by plain mutexes; locks are never held across an await.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    qr: Arc<QrStore>,
    dedup: Arc<DedupCache>,
    relay: Arc<WebhookRelay>,
    factory: Arc<dyn ClientFactory>,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        relay: Arc<WebhookRelay>,
        dedup: Arc<DedupCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            qr: Arc::new(QrStore::new()),
            dedup,
            relay,
            factory,
        })
    }

    /// Returns the existing session or creates one: allocates the client
    /// handle, wires its events, and issues the asynchronous initialize.
    /// Never creates a second handle for the same user id.
    pub fn get_or_create(self: &Arc<Self>, user_id: &str) -> anyhow::Result<Arc<Session>> {
        // Creation is synchronous, so it stays under the map lock; a racing
        // caller never allocates a second handle.
        let (session, client, events) = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = sessions.get(user_id) {
                return Ok(existing.clone());
            }
            info!(user_id, "creating new client session");
            let (client, events) = self.factory.create(user_id)?;
            let session = Session::new(user_id, client.clone());
            sessions.insert(user_id.to_string(), session.clone());
            (session, client, events)
        };

        let ctx = PipelineContext {
            user_id: user_id.to_string(),
            client: client.clone(),
            relay: self.relay.clone(),
            dedup: self.dedup.clone(),
        };
        let handle = tokio::spawn(run_session_events(
            Arc::downgrade(self),
            session.clone(),
            events,
            self.qr.clone(),
            ctx,
        ));
        *session
            .event_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        let init_user = user_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = client.initialize().await {
                error!(user_id = %init_user, "client initialize failed: {err}");
            }
        });

        Ok(session)
    }

    /// Read-only: an unknown user id never creates a session.
    pub async fn status(&self, user_id: &str) -> SessionStatus {
        let session = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(user_id).cloned()
        };
        let Some(session) = session else {
            return SessionStatus::not_initialized();
        };

        let has_qr = self.qr.contains(user_id);
        match session.client.get_state().await {
            Ok(state) => {
                let connected = state == CONNECTED_STATE;
                SessionStatus {
                    connected,
                    has_qr,
                    status: if connected { "connected" } else { "disconnected" }.to_string(),
                    state: Some(state),
                    error: None,
                }
            }
            Err(err) => SessionStatus {
                connected: false,
                has_qr,
                status: "error".to_string(),
                state: None,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn qr_code(&self, user_id: &str) -> Option<String> {
        self.qr.get(user_id)
    }

    pub async fn groups(&self, user_id: &str) -> Result<Vec<GroupInfo>, RegistryError> {
        let session = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(user_id).cloned()
        };
        let session = session.ok_or(RegistryError::NotInitialized)?;

        let chats = session
            .client
            .get_chats()
            .await
            .map_err(RegistryError::Client)?;
        Ok(chats
            .into_iter()
            .filter(|chat| chat.is_group)
            .map(|chat| GroupInfo {
                id: chat.id,
                name: chat.name,
            })
            .collect())
    }

    /// Logout then destroy the handle. A missing session is a successful
    /// no-op; handle failures propagate to the caller.
    pub async fn logout(&self, user_id: &str) -> Result<(), RegistryError> {
        let session = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(user_id).cloned()
        };
        let Some(session) = session else {
            return Ok(());
        };

        session.client.logout().await.map_err(RegistryError::Logout)?;
        session
            .client
            .destroy()
            .await
            .map_err(RegistryError::Logout)?;
        self.evict(user_id);
        info!(user_id, "user logged out");
        Ok(())
    }

    fn evict(&self, user_id: &str) {
        let removed = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(user_id)
        };
        self.qr.remove(user_id);
        if let Some(session) = removed {
            session.abort_event_task();
        }
    }

    /// Best-effort teardown of every handle; one failure never stops the
    /// rest. Clears the registry and the QR store afterward.
    pub async fn shutdown_all(&self) {
        info!("destroying all client sessions");
        let sessions: Vec<(String, Arc<Session>)> = {
            let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            map.drain().collect()
        };
        for (user_id, session) in sessions {
            if let Err(err) = session.client.destroy().await {
                error!(user_id = %user_id, "error destroying client: {err}");
            }
            session.abort_event_task();
        }
        self.qr.clear();
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn run_session_events(
    registry: Weak<SessionRegistry>,
    session: Arc<Session>,
    mut events: mpsc::Receiver<ClientEvent>,
    qr: Arc<QrStore>,
    ctx: PipelineContext,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Qr(code) => {
                info!(user_id = %session.user_id, "QR code received");
                session.set_state(SessionState::QrPending);
                qr.set(&session.user_id, code);
            }
            ClientEvent::Authenticated => {
                info!(user_id = %session.user_id, "client authenticated");
                session.set_state(SessionState::Authenticating);
                qr.remove(&session.user_id);
            }
            ClientEvent::Ready => {
                info!(user_id = %session.user_id, "client ready");
                session.set_state(SessionState::Connected);
                qr.remove(&session.user_id);
            }
            ClientEvent::AuthFailure(message) => {
                warn!(user_id = %session.user_id, "auth failure: {message}");
                session.set_error(message);
            }
            ClientEvent::Disconnected(reason) => {
                warn!(user_id = %session.user_id, %reason, "client disconnected, evicting session");
                session.set_state(SessionState::Disconnected);
                if let Some(registry) = registry.upgrade() {
                    registry.evict(&session.user_id);
                }
                break;
            }
            ClientEvent::Message(msg) => {
                // Each message runs in its own task so a slow webhook call
                // never blocks this session's lifecycle events.
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    pipeline::process_message(&ctx, msg).await;
                });
            }
        }
    }
}
