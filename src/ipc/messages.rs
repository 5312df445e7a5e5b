//! Wire format of the presentation-layer channels.
//!
//! Every frame is a JSON object `{"channel": NAME, "payload": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::ModulePayload;

/// Frames sent by a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "LOADMODULE")]
    LoadModule(i64),

    /// Stage name and its argument, either as JSON text or as an inline value
    #[serde(rename = "EXECUTE")]
    Execute(String, Value),

    #[serde(rename = "READY")]
    Ready,
}

/// Frames sent to views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "LOADMODULE")]
    LoadModule(String),

    /// `None` on success, the error message otherwise
    #[serde(rename = "EXECUTE")]
    Execute(Option<String>),

    #[serde(rename = "NEW")]
    New(ModulePayload),

    #[serde(rename = "NAVIGATE")]
    Navigate(String),

    #[serde(rename = "ERROR")]
    Error(String),
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Argument text for an `EXECUTE` frame.
///
/// Views normally send the argument already serialized; an inline JSON value
/// is serialized here so both forms reach the stage runner as text.
pub fn argument_text(argument: &Value) -> String {
    match argument {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
