//! Compact binary codec backed by `bitcode`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{expect_kind, Codec};
use crate::error::{DeserializationError, SerializationError};
use crate::message::{Message, MessageKind};

/// Binary wire format; smaller and faster than JSON, not self-describing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcodeCodec;

impl<M> Codec<M> for BitcodeCodec
where
    M: Message + Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &'static str {
        "application/x-bitcode"
    }

    fn serialize(&self, message: &M) -> Result<Vec<u8>, SerializationError> {
        bitcode::serialize(message).map_err(|e| SerializationError {
            message_type: message.message_type().to_string(),
            reason: e.to_string(),
        })
    }

    fn deserialize(&self, bytes: &[u8], expected: MessageKind) -> Result<M, DeserializationError> {
        let message: M = bitcode::deserialize(bytes).map_err(|e| DeserializationError::Malformed {
            kind: expected,
            reason: e.to_string(),
        })?;
        expect_kind(message, expected)
    }
}
