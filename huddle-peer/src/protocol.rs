//! Action messages exchanged between peers.
//!
//! Every payload is a JSON object carrying a `type` discriminator.
//! Classification is mutually exclusive in priority order:
//!
//! 1. `code-*`  → [`CodeAction`]
//! 2. `timer-*` → [`TimerAction`]
//! 3. a known drawing discriminator → [`DrawingAction`]
//! 4. anything else → [`Action::Unrecognized`] (dropped by the router)
//!
//! Code and timer actions carry a `senderId` stamped before transmission
//! so receivers can discard echoes of their own actions. Drawing actions
//! carry no sender field; the wire shape is shared with existing clients
//! and must not grow fields they do not send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::ParticipantId;

/// A point in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Drawing stroke discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawingKind {
    Start,
    Draw,
    End,
    Clear,
    Undo,
    Redo,
}

/// Wire tags belonging to the drawing category.
const DRAWING_TAGS: [&str; 6] = ["start", "draw", "end", "clear", "undo", "redo"];

/// One unit of whiteboard change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingAction {
    #[serde(rename = "type")]
    pub kind: DrawingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_position: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_position: Option<Point>,
}

impl DrawingAction {
    /// A bare action of the given kind; stroke fields filled by the caller.
    pub fn new(kind: DrawingKind) -> Self {
        Self {
            kind,
            tool: None,
            color: None,
            line_width: None,
            points: None,
            start_position: None,
            current_position: None,
        }
    }
}

/// Code editor discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeKind {
    CodeChange,
    CodeSelection,
    CodeCursor,
    CodeLanguageChange,
    CodeRun,
}

/// Editor selection range (1-based, editor convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRange {
    pub start_line_number: u32,
    pub start_column: u32,
    pub end_line_number: u32,
    pub end_column: u32,
}

/// Editor cursor position (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line_number: u32,
    pub column: u32,
}

/// One unit of shared-editor change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAction {
    #[serde(rename = "type")]
    pub kind: CodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<CursorPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Stamped by the sending session; used by receivers for echo
    /// suppression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ParticipantId>,
}

impl CodeAction {
    pub fn new(kind: CodeKind) -> Self {
        Self {
            kind,
            content: None,
            selection: None,
            position: None,
            language: None,
            sender_id: None,
        }
    }

    /// Full-document content replacement.
    pub fn change(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(CodeKind::CodeChange)
        }
    }

    /// Request that peers run the current code.
    pub fn run() -> Self {
        Self::new(CodeKind::CodeRun)
    }
}

/// Timer mode shared across the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Countup,
    Countdown,
}

/// Timer discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerKind {
    TimerStart,
    TimerPause,
    TimerReset,
}

/// One unit of session-timer change.
///
/// `start_time` is a wall-clock epoch timestamp in milliseconds supplied
/// by the UI layer; `paused_time` is accumulated elapsed seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerAction {
    #[serde(rename = "type")]
    pub kind: TimerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TimerMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ParticipantId>,
}

impl TimerAction {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            start_time: None,
            paused_time: None,
            mode: None,
            sender_id: None,
        }
    }

    pub fn start(start_time: u64, paused_time: u64, mode: TimerMode) -> Self {
        Self {
            start_time: Some(start_time),
            paused_time: Some(paused_time),
            mode: Some(mode),
            ..Self::new(TimerKind::TimerStart)
        }
    }

    pub fn pause(paused_time: u64) -> Self {
        Self {
            paused_time: Some(paused_time),
            ..Self::new(TimerKind::TimerPause)
        }
    }

    pub fn reset() -> Self {
        Self::new(TimerKind::TimerReset)
    }
}

/// A classified inbound action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Drawing(DrawingAction),
    Code(CodeAction),
    Timer(TimerAction),
    /// Discriminator matched no category. Dropped by the router; kept as
    /// an explicit branch rather than a silent fall-through.
    Unrecognized(String),
}

impl Action {
    /// Decode and classify a raw channel payload.
    ///
    /// Payloads without a string `type` field, or whose fields do not
    /// match their category's shape, are malformed
    /// ([`ProtocolError::Decode`]) — the caller drops them.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Decode("missing `type` discriminator".to_string()))?
            .to_string();

        if tag.starts_with("code-") {
            let action = serde_json::from_value(value)
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;
            Ok(Self::Code(action))
        } else if tag.starts_with("timer-") {
            let action = serde_json::from_value(value)
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;
            Ok(Self::Timer(action))
        } else if DRAWING_TAGS.contains(&tag.as_str()) {
            let action = serde_json::from_value(value)
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;
            Ok(Self::Drawing(action))
        } else {
            Ok(Self::Unrecognized(tag))
        }
    }
}

/// Serialize any action payload to its JSON wire form.
pub fn encode<T: Serialize>(action: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(action).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Encode error: {e}"),
            Self::Decode(e) => write!(f, "Decode error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
