use serde::{Deserialize, Serialize};

/// Envelope code of a frame carrying a matched event.
pub const EVENT_CODE: i64 = 100;
/// Envelope code of a frame carrying a service message.
pub const SERVICE_MESSAGE_CODE: i64 = 300;

/// Wire wrapper around every inbound stream frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingMessage {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_message: Option<ServiceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceMessage {
    #[serde(default)]
    pub service_code: i64,
    #[serde(default)]
    pub message: String,
}

/// One matched post, comment or share.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub event_type: String,
    pub event_id: EventId,
    #[serde(default)]
    pub event_url: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub action_time: i64,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_post_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_post_creation_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<i64>,
    /// Tags of the rules that matched this event.
    #[serde(default)]
    pub tags: Vec<String>,
    pub author: Author,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId {
    #[serde(default)]
    pub post_owner_id: i64,
    #[serde(default)]
    pub post_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_post_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub author_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_post_author_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_post_author_url: Option<String>,
    /// Platform the action originated from, as reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Post,
    Comment,
    Share,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    New,
    Update,
    Delete,
    Restore,
    Other,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            "post" => EventKind::Post,
            "comment" => EventKind::Comment,
            "share" => EventKind::Share,
            _ => EventKind::Other,
        }
    }

    pub fn action_kind(&self) -> EventAction {
        match self.action.as_str() {
            "new" => EventAction::New,
            "update" => EventAction::Update,
            "delete" => EventAction::Delete,
            "restore" => EventAction::Restore,
            _ => EventAction::Other,
        }
    }

    /// Whether any rule with `tag` matched this event.
    pub fn matched(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }
}

impl StreamingMessage {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wraps an event in a deliverable envelope.
    pub fn event(event: Event) -> Self {
        Self {
            code: EVENT_CODE,
            service_message: None,
            event: Some(event),
        }
    }
}
