use crate::client::ProtocolClient;
use crate::dedup::DedupCache;
use crate::relay::{RelayError, WebhookRelay};
use crate::types::{InboundMessage, MediaBlob, MessageType, WebhookPayload};
use base64::Engine;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const FALLBACK_REPLY: &str =
    "Sorry, something went wrong while processing your message. Please try again in a few moments.";

const DEFAULT_CHAT_NAME: &str = "WhatsApp";
const DEFAULT_SENDER_NAME: &str = "Unknown";

/// Everything one message event needs: the owning session's client handle plus
/// the process-wide dedup cache and relay.
#[derive(Clone)]
pub struct PipelineContext {
    pub user_id: String,
    pub client: Arc<dyn ProtocolClient>,
    pub relay: Arc<WebhookRelay>,
    pub dedup: Arc<DedupCache>,
}

pub fn classify(msg: &InboundMessage) -> MessageType {
    if msg.has_media {
        match msg.kind.as_str() {
            "image" => MessageType::Image,
            "ptt" | "audio" => MessageType::Audio,
            _ => MessageType::Document,
        }
    } else if matches!(msg.kind.as_str(), "ptt" | "audio") {
        // Upstream sometimes reports voice notes without the media flag.
        MessageType::Audio
    } else {
        MessageType::Text
    }
}

pub fn build_payload(user_id: &str, msg: &InboundMessage, now: DateTime<Utc>) -> WebhookPayload {
    let group_name = msg
        .chat_name
        .clone()
        .or_else(|| msg.sender_pushname.clone())
        .unwrap_or_else(|| DEFAULT_CHAT_NAME.to_string());
    let sender = msg.author.clone().unwrap_or_else(|| msg.chat_id.clone());
    let sender_name = msg
        .sender_pushname
        .clone()
        .or_else(|| msg.sender_contact_name.clone())
        .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string());

    WebhookPayload {
        user_id: user_id.to_string(),
        group_name,
        group_id: msg.chat_id.clone(),
        sender,
        sender_name,
        timestamp: now.to_rfc3339(),
        message_type: classify(msg),
        text: msg.body.clone(),
        media: None,
        media_mime: None,
        media_filename: None,
        validation_required: true,
    }
}

pub fn filename_from_mime(mime: &str) -> String {
    let subtype = mime.split('/').nth(1).unwrap_or("bin");
    format!("file.{subtype}")
}

pub fn attach_media(payload: &mut WebhookPayload, media: &MediaBlob) {
    payload.media = Some(base64::engine::general_purpose::STANDARD.encode(&media.data));
    payload.media_mime = Some(media.mime_type.clone());
    payload.media_filename = Some(
        media
            .filename
            .clone()
            .unwrap_or_else(|| filename_from_mime(&media.mime_type)),
    );
}

/// Runs the full relay pipeline for one inbound message. Never returns an
/// error: every failure ends in a logged diagnostic and, where delivery was
/// attempted, the fallback apology to the chat.
pub async fn process_message(ctx: &PipelineContext, msg: InboundMessage) {
    if !ctx.dedup.check_and_mark(&msg.id, Utc::now()) {
        debug!(user_id = %ctx.user_id, message_id = %msg.id, "skipping duplicate message");
        return;
    }

    info!(
        user_id = %ctx.user_id,
        message_id = %msg.id,
        from = %msg.chat_id,
        kind = %msg.kind,
        has_media = msg.has_media,
        "message received"
    );

    let mut payload = build_payload(&ctx.user_id, &msg, Utc::now());

    if msg.has_media {
        match ctx.client.download_media(&msg.id).await {
            Ok(media) => attach_media(&mut payload, &media),
            Err(err) => {
                warn!(message_id = %msg.id, "media download failed, forwarding without media: {err}");
            }
        }
    }

    match ctx.relay.deliver(&payload).await {
        Ok(resp) => {
            if let Some(reply) = resp.reply_message {
                if let Err(err) = ctx.client.reply(&msg.id, &reply).await {
                    error!(message_id = %msg.id, "failed to send backend reply: {err}");
                }
            } else {
                debug!(message_id = %msg.id, "no reply message from backend");
            }
        }
        Err(err) => {
            match &err {
                RelayError::Backend { status, body } => {
                    error!(message_id = %msg.id, %status, body = %body, "webhook delivery rejected");
                }
                RelayError::Network(_) => {
                    error!(message_id = %msg.id, "webhook delivery failed: {err}");
                }
            }
            if let Err(reply_err) = ctx.client.reply(&msg.id, FALLBACK_REPLY).await {
                error!(message_id = %msg.id, "failed to send fallback reply: {reply_err}");
            }
        }
    }
}
