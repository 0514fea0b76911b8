use crate::types::{ChatInfo, InboundMessage, MediaBlob};
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle and message events emitted by one user's protocol client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Qr(String),
    Authenticated,
    Ready,
    AuthFailure(String),
    Disconnected(String),
    Message(InboundMessage),
}

/// Capability surface of the external wire-protocol client. The gateway never
/// speaks the messaging protocol itself; it issues commands through this trait
/// and consumes events from the channel handed out by the factory.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn get_state(&self) -> Result<String>;
    async fn get_chats(&self) -> Result<Vec<ChatInfo>>;
    async fn download_media(&self, message_id: &str) -> Result<MediaBlob>;
    async fn reply(&self, message_id: &str, text: &str) -> Result<()>;
    async fn logout(&self) -> Result<()>;
    async fn destroy(&self) -> Result<()>;
}

pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        user_id: &str,
    ) -> Result<(Arc<dyn ProtocolClient>, mpsc::Receiver<ClientEvent>)>;
}

const EVENT_CHANNEL_CAP: usize = 100;
const EVENT_POLL_RETRY_SECONDS: u64 = 2;

/// Client backed by the browser-automation sidecar process, one session per
/// user id, commands over JSON/HTTP.
pub struct SidecarClient {
    http: Client,
    base: String,
}

impl SidecarClient {
    pub fn new(http: Client, sidecar_url: &str, user_id: &str) -> Self {
        let base = format!(
            "{}/sessions/{}",
            sidecar_url.trim_end_matches('/'),
            utf8_percent_encode(user_id, NON_ALPHANUMERIC)
        );
        Self { http, base }
    }

    async fn command(&self, action: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base, action))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("sidecar {} failed: {} {}", action, status, body));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: String,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    data: String,
    mimetype: String,
    filename: Option<String>,
}

#[async_trait]
impl ProtocolClient for SidecarClient {
    async fn initialize(&self) -> Result<()> {
        self.command("initialize").await
    }

    async fn get_state(&self) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/state", self.base))
            .send()
            .await?
            .error_for_status()?;
        let state: StateResponse = resp.json().await?;
        Ok(state.state)
    }

    async fn get_chats(&self) -> Result<Vec<ChatInfo>> {
        let resp = self
            .http
            .get(format!("{}/chats", self.base))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn download_media(&self, message_id: &str) -> Result<MediaBlob> {
        let resp = self
            .http
            .get(format!(
                "{}/messages/{}/media",
                self.base,
                utf8_percent_encode(message_id, NON_ALPHANUMERIC)
            ))
            .send()
            .await?
            .error_for_status()?;
        let media: MediaResponse = resp.json().await?;
        let data = base64::engine::general_purpose::STANDARD.decode(media.data)?;
        Ok(MediaBlob {
            data,
            mime_type: media.mimetype,
            filename: media.filename,
        })
    }

    async fn reply(&self, message_id: &str, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!(
                "{}/messages/{}/reply",
                self.base,
                utf8_percent_encode(message_id, NON_ALPHANUMERIC)
            ))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("sidecar reply failed: {} {}", status, body));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.command("logout").await
    }

    async fn destroy(&self) -> Result<()> {
        self.command("destroy").await
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SidecarEvent {
    Qr { code: String },
    Authenticated,
    Ready,
    AuthFailure { message: String },
    Disconnected { reason: String },
    Message { message: InboundMessage },
}

impl From<SidecarEvent> for ClientEvent {
    fn from(ev: SidecarEvent) -> Self {
        match ev {
            SidecarEvent::Qr { code } => ClientEvent::Qr(code),
            SidecarEvent::Authenticated => ClientEvent::Authenticated,
            SidecarEvent::Ready => ClientEvent::Ready,
            SidecarEvent::AuthFailure { message } => ClientEvent::AuthFailure(message),
            SidecarEvent::Disconnected { reason } => ClientEvent::Disconnected(reason),
            SidecarEvent::Message { message } => ClientEvent::Message(message),
        }
    }
}

pub struct SidecarFactory {
    http: Client,
    sidecar_url: String,
}

impl SidecarFactory {
    pub fn new(http: Client, sidecar_url: &str) -> Self {
        Self {
            http,
            sidecar_url: sidecar_url.to_string(),
        }
    }
}

impl ClientFactory for SidecarFactory {
    fn create(
        &self,
        user_id: &str,
    ) -> Result<(Arc<dyn ProtocolClient>, mpsc::Receiver<ClientEvent>)> {
        let client = Arc::new(SidecarClient::new(
            self.http.clone(),
            &self.sidecar_url,
            user_id,
        ));
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAP);
        tokio::spawn(pump_events(
            self.http.clone(),
            format!("{}/events", client.base),
            tx,
        ));
        Ok((client, rx))
    }
}

/// Polls the sidecar event endpoint and forwards events into the session
/// channel. Exits once the receiving side is gone; an empty or failed poll
/// backs off before the next request.
async fn pump_events(http: Client, url: String, tx: mpsc::Sender<ClientEvent>) {
    loop {
        if tx.is_closed() {
            return;
        }
        let batch = match http.get(&url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => resp.json::<Vec<SidecarEvent>>().await,
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };
        match batch {
            Ok(events) => {
                // A sidecar that answers empty batches immediately instead of
                // long-polling must not be hammered.
                if events.is_empty() {
                    tokio::time::sleep(std::time::Duration::from_secs(EVENT_POLL_RETRY_SECONDS))
                        .await;
                    continue;
                }
                for ev in events {
                    if tx.send(ev.into()).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                debug!("sidecar event poll failed: {err}");
                tokio::time::sleep(std::time::Duration::from_secs(EVENT_POLL_RETRY_SECONDS)).await;
            }
        }
    }
}
