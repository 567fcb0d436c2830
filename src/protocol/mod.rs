//! Message endpoint to the external controller.
//!
//! | Direction | Tag | Payload |
//! |-----------|-----|---------|
//! | out | `setup` | none |
//! | in | `hooks` | newline-separated `Class.method` lines |
//! | out | `dex` | `{filename}` plus the module bytes |
//! | in | `rundata` | ignored |
//! | out | `rundata` | `{dexFiles, xrefs}` |
//!
//! Outbound events serialise as JSON objects tagged by `type`:
//!
//! ```rust
//! use dexcap::protocol::Event;
//!
//! let event = Event::Dex { filename: "classes2.dex-ab12".into() };
//! assert_eq!(
//!     serde_json::to_string(&event).unwrap(),
//!     r#"{"type":"dex","filename":"classes2.dex-ab12"}"#,
//! );
//! ```
//!
//! Components only ever call into a [`Channel`]; the channel never calls back
//! into them except through handlers they registered with
//! [`Channel::on_message`].

pub mod loopback;

use serde::{Deserialize, Serialize};

use crate::session::Snapshot;
use crate::Result;

pub use loopback::{LoopbackChannel, Sent};

/// Message tags.
pub mod tags {
    pub const SETUP: &str = "setup";
    pub const HOOKS: &str = "hooks";
    pub const DEX: &str = "dex";
    pub const RUNDATA: &str = "rundata";
}

/// A message sent to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// Session started; the controller answers with `hooks`.
    Setup,
    /// A captured bytecode module. The bytes travel alongside as binary data.
    Dex { filename: String },
    /// The session's aggregate state, in answer to a `rundata` request.
    Rundata(Snapshot),
}

impl Event {
    /// Encode as a JSON text frame, for channels that carry text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Event::Setup => tags::SETUP,
            Event::Dex { .. } => tags::DEX,
            Event::Rundata(_) => tags::RUNDATA,
        }
    }
}

/// A message received from the controller.
///
/// As a text frame it reads `{"type": <tag>, "payload": <any>}`; a missing
/// payload is `null`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Inbound {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Inbound {
    pub fn new(tag: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    /// Decode a JSON text frame.
    pub fn from_json(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// The payload as text. `null` reads as the empty string.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => Some(""),
            _ => None,
        }
    }
}

/// Handler registered with [`Channel::on_message`].
pub type MessageHandler = Box<dyn Fn(Inbound) + Send + Sync>;

/// Duplex endpoint to the controller process.
///
/// Messages of one tag are delivered in the order they were sent; there is no
/// ordering between different tags.
pub trait Channel: Send + Sync {
    /// Send an event, with optional binary data travelling out-of-band.
    fn send(&self, event: &Event, data: Option<&[u8]>) -> Result<()>;

    /// Block the calling thread until a message tagged `tag` arrives.
    fn await_message(&self, tag: &str) -> Result<Inbound>;

    /// Invoke `handler` for every message tagged `tag`, now and in the future.
    fn on_message(&self, tag: &str, handler: MessageHandler) -> Result<()>;
}
