//! DXLink JSON Codec
//!
//! Frames are single JSON objects over WebSocket text messages. Market events
//! inside `FEED_DATA` are decoded one by one; events of a type the collector
//! does not consume, or with a missing symbol, are skipped and counted rather
//! than failing the whole frame.

use serde_json::Value;

use super::messages::{ClientMessage, MarketEvent, ServerMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of decoding a `FEED_DATA` payload.
#[derive(Debug, Default)]
pub struct DecodedEvents {
    /// Events that decoded cleanly.
    pub events: Vec<MarketEvent>,
    /// Entries that were not usable.
    pub skipped: usize,
}

/// JSON codec for DXLink frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a client frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &ClientMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Decode a server frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with a known shape.
    pub fn decode(&self, text: &str) -> Result<ServerMessage, CodecError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    /// Decode the events of a `FEED_DATA` frame.
    #[must_use]
    pub fn decode_events(&self, data: Vec<Value>) -> DecodedEvents {
        let mut decoded = DecodedEvents {
            events: Vec::with_capacity(data.len()),
            skipped: 0,
        };

        for entry in data {
            if !entry.is_object() {
                decoded.skipped += 1;
                continue;
            }
            match serde_json::from_value::<MarketEvent>(entry) {
                Ok(event) if !event.symbol().is_empty() => decoded.events.push(event),
                Ok(_) => decoded.skipped += 1,
                Err(e) => {
                    tracing::trace!(error = %e, "Skipping undecodable event");
                    decoded.skipped += 1;
                }
            }
        }

        decoded
    }
}
