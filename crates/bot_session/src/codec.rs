//! Payload encoding
//!
//! Data payloads are stored as a JSON envelope tagged with a format version.
//! Unknown envelope fields are ignored on read, so newer writers never break
//! older readers. FSM tags and locales are stored as plain UTF-8.

use crate::error::SessionResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form scratch data attached to a conversation.
pub type StateData = Map<String, Value>;

pub const FORMAT_VERSION: u32 = 1;

fn current_version() -> u32 {
    FORMAT_VERSION
}

#[derive(Serialize, Deserialize)]
struct DataEnvelope {
    #[serde(default = "current_version")]
    v: u32,
    #[serde(default)]
    data: StateData,
}

pub fn encode_data(data: &StateData) -> SessionResult<Vec<u8>> {
    let envelope = DataEnvelope {
        v: FORMAT_VERSION,
        data: data.clone(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode_data(bytes: &[u8]) -> SessionResult<StateData> {
    let envelope: DataEnvelope = serde_json::from_slice(bytes)?;
    Ok(envelope.data)
}

pub fn encode_tag(tag: &str) -> Vec<u8> {
    tag.as_bytes().to_vec()
}

pub fn decode_tag(bytes: Vec<u8>) -> Option<String> {
    String::from_utf8(bytes).ok().filter(|s| !s.is_empty())
}
