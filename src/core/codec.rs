//! Versioned payload envelope for blob columns.
//!
//! Every encoded payload starts with a single format byte so rows written by
//! one encoding stay readable after the store switches to another.

use super::{DbError, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Format {
    Json,
    #[default]
    MessagePack,
}

impl Format {
    fn tag(self) -> u8 {
        match self {
            Format::Json => 0,
            Format::MessagePack => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Format::Json),
            1 => Some(Format::MessagePack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    format: Format,
}

impl Codec {
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let mut out = vec![self.format.tag()];
        match self.format {
            Format::Json => serde_json::to_writer(&mut out, value)
                .map_err(|e| DbError::InvalidRecord(format!("json encode failed: {}", e)))?,
            Format::MessagePack => {
                let body = rmp_serde::to_vec_named(value).map_err(|e| {
                    DbError::InvalidRecord(format!("msgpack encode failed: {}", e))
                })?;
                out.extend_from_slice(&body);
            }
        }
        Ok(out)
    }

    /// Decodes with whichever format the payload was written in, independent
    /// of the format this codec writes.
    pub fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| DbError::Deserialize("empty payload".into()))?;

        match Format::from_tag(*tag) {
            Some(Format::Json) => serde_json::from_slice(body)
                .map_err(|e| DbError::Deserialize(format!("json: {}", e))),
            Some(Format::MessagePack) => rmp_serde::from_slice(body)
                .map_err(|e| DbError::Deserialize(format!("msgpack: {}", e))),
            None => Err(DbError::Deserialize(format!(
                "unknown payload format {}",
                tag
            ))),
        }
    }
}
