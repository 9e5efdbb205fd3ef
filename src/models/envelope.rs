use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the persistence layer should do with an envelope
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    #[default]
    Update,
    Save,
    Clear,
}

impl Action {
    /// Map a wire action name. Anything unrecognised is treated as an update.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "SAVE" => Action::Save,
            "CLEAR" => Action::Clear,
            _ => Action::Update,
        }
    }
}

/// The unit of traffic between clients, the registry, the persistence
/// coordinator and other processes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub room_id: String,
    pub content: String,
    #[serde(default)]
    pub action: Action,
}

impl Envelope {
    pub fn update(room_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            content: content.into(),
            action: Action::Update,
        }
    }
}

/// Lenient shape accepted from clients. Every field may be missing.
#[derive(Deserialize, Debug)]
struct WireEnvelope {
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    action: Option<String>,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The frame was a JSON envelope. `room_id` is `None` when the client left it out.
    Structured {
        room_id: Option<String>,
        content: String,
        action: Action,
    },
    /// The frame was plain text and is taken as the new room content.
    Raw(String),
}

impl Inbound {
    pub fn decode(frame: &str) -> Self {
        // Only a JSON object is an envelope; arrays and scalars are pasted text
        let wire = match serde_json::from_str::<Value>(frame) {
            Ok(value @ Value::Object(_)) => serde_json::from_value::<WireEnvelope>(value),
            _ => return Inbound::Raw(frame.to_string()),
        };
        match wire {
            Ok(wire) => Inbound::Structured {
                room_id: wire.room_id.filter(|room_id| !room_id.is_empty()),
                content: wire.content.unwrap_or_default(),
                action: wire.action.as_deref().map(Action::from_wire).unwrap_or_default(),
            },
            Err(_) => Inbound::Raw(frame.to_string()),
        }
    }

    /// Resolve into an envelope, filling the room from the session when absent.
    pub fn into_envelope(self, session_room: &str) -> Envelope {
        match self {
            Inbound::Structured {
                room_id,
                content,
                action,
            } => Envelope {
                room_id: room_id.unwrap_or_else(|| session_room.to_string()),
                content,
                action,
            },
            Inbound::Raw(content) => Envelope::update(session_room, content),
        }
    }
}
