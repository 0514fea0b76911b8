use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub chat_id: String,
    pub author: Option<String>,
    pub kind: String,
    pub body: Option<String>,
    pub has_media: bool,
    pub is_group: bool,
    pub chat_name: Option<String>,
    pub sender_pushname: Option<String>,
    pub sender_contact_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaBlob {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: String,
    pub name: String,
    pub is_group: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Document,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub user_id: String,
    pub group_name: String,
    pub group_id: String,
    pub sender: String,
    pub sender_name: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_filename: Option<String>,
    pub validation_required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reply_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connected: bool,
    #[serde(rename = "hasQR")]
    pub has_qr: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn not_initialized() -> Self {
        Self {
            connected: false,
            has_qr: false,
            status: "not_initialized".to_string(),
            state: None,
            error: None,
        }
    }
}
