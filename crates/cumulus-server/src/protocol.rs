//! Cloud-variable wire protocol.
//!
//! One JSON object per WebSocket text frame, tagged by `"method"`:
//!
//! ```text
//! client → server   {"method":"handshake","project_id":"104","user":"griffpatch"}
//!                   {"method":"set","name":"☁ score","value":10}
//!                   {"method":"get","name":"☁ score"}
//! server → client   {"method":"all","variables":{"☁ score":10}}
//!                   {"method":"set","name":"☁ score","value":10}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ServerError;

/// Message sent by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Join the room of a project.
    Handshake {
        /// Project the client is running; names the room
        #[serde(deserialize_with = "project_id")]
        project_id: String,
        /// Display name, informational only
        #[serde(default)]
        user: String,
    },
    /// Write a variable and broadcast it to the room.
    Set {
        /// Variable name
        name: String,
        /// New value, any JSON
        #[serde(default)]
        value: Value,
    },
    /// Read a variable.
    Get {
        /// Variable name
        name: String,
    },
}

impl ClientMessage {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// `ServerError::Protocol` for malformed JSON, a missing or unknown
    /// `method`, or missing fields.
    pub fn parse(text: &str) -> Result<Self, ServerError> {
        serde_json::from_str(text).map_err(|e| ServerError::Protocol(e.to_string()))
    }
}

/// Message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Full room snapshot, sent once after the handshake.
    All {
        /// Every variable of the room
        variables: BTreeMap<String, Value>,
    },
    /// One variable's current value.
    Set {
        /// Variable name
        name: String,
        /// Current value
        value: Value,
    },
}

impl ServerMessage {
    /// Encode as a text frame payload.
    ///
    /// # Errors
    ///
    /// `ServerError::Protocol` if a value cannot be serialized.
    pub fn to_json(&self) -> Result<String, ServerError> {
        serde_json::to_string(self).map_err(|e| ServerError::Protocol(e.to_string()))
    }
}

/// Clients send project ids as strings or bare numbers.
fn project_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(id) => id,
        Repr::Number(id) => id.to_string(),
    })
}
