//! JSON codec backed by `serde_json`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{expect_kind, Codec};
use crate::error::{DeserializationError, SerializationError};
use crate::message::{Message, MessageKind};

/// Human-readable JSON wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<M> Codec<M> for JsonCodec
where
    M: Message + Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, message: &M) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(message).map_err(|e| SerializationError {
            message_type: message.message_type().to_string(),
            reason: e.to_string(),
        })
    }

    fn deserialize(&self, bytes: &[u8], expected: MessageKind) -> Result<M, DeserializationError> {
        let message: M =
            serde_json::from_slice(bytes).map_err(|e| DeserializationError::Malformed {
                kind: expected,
                reason: e.to_string(),
            })?;
        expect_kind(message, expected)
    }
}
