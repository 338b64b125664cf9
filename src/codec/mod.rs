//! Codecs - turn a typed message into bytes and back.
//!
//! A codec is set once per endpoint group and shared by all of its
//! endpoints. Decoding is told which kind the endpoint carries so a payload
//! of the wrong kind is reported instead of being routed.

mod json;

#[cfg(feature = "bitcode")]
mod binary;

use crate::error::{DeserializationError, SerializationError};
use crate::message::{Message, MessageKind};

pub use json::JsonCodec;

#[cfg(feature = "bitcode")]
pub use binary::BitcodeCodec;

/// Serialization strategy for a message family.
pub trait Codec<M: Message>: Send + Sync {
    /// MIME-style name of the wire format.
    fn content_type(&self) -> &'static str;

    fn serialize(&self, message: &M) -> Result<Vec<u8>, SerializationError>;

    /// Decode `bytes`, which arrived on an endpoint carrying `expected`.
    fn deserialize(&self, bytes: &[u8], expected: MessageKind) -> Result<M, DeserializationError>;
}

/// Shared check run by the bundled codecs after decoding.
pub(crate) fn expect_kind<M: Message>(
    message: M,
    expected: MessageKind,
) -> Result<M, DeserializationError> {
    let actual = message.kind();
    if actual == expected {
        Ok(message)
    } else {
        Err(DeserializationError::UnexpectedKind { expected, actual })
    }
}
