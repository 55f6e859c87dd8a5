//! The on-disk envelope wrapping a `Session`: schema version, optional gzip
//! compression, and an optional SHA-256 checksum of the serialized payload.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

use crate::model::Session;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub version: String,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub checksum: Option<String>,
    pub data: Session,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("failed to serialize session: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to deserialize session envelope: {0}")]
    Deserialize(serde_json::Error),
    #[error("gzip compression failed: {0}")]
    Compress(std::io::Error),
    #[error("gzip decompression failed: {0}")]
    Decompress(std::io::Error),
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
}

impl SessionEnvelope {
    pub fn new(session: Session) -> Self {
        Self {
            version: session.version.clone(),
            compressed: false,
            checksum: None,
            data: session,
        }
    }

    pub fn with_checksum(mut self) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_vec(&self.data).map_err(EnvelopeError::Serialize)?;
        self.checksum = Some(hex::encode(Sha256::digest(&payload)));
        Ok(self)
    }

    /// Serializes to bytes suitable for writing to disk. When `compressed`
    /// is set, the data field is gzip-compressed inside a sibling container
    /// rather than inline JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        if self.compressed {
            let json = serde_json::to_vec(self).map_err(EnvelopeError::Serialize)?;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json).map_err(EnvelopeError::Compress)?;
            encoder.finish().map_err(EnvelopeError::Compress)
        } else {
            serde_json::to_vec_pretty(self).map_err(EnvelopeError::Serialize)
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if is_gzip(bytes) {
            let mut decoder = GzDecoder::new(bytes);
            let mut json = Vec::new();
            decoder.read_to_end(&mut json).map_err(EnvelopeError::Decompress)?;
            serde_json::from_slice(&json).map_err(EnvelopeError::Deserialize)
        } else {
            serde_json::from_slice(bytes).map_err(EnvelopeError::Deserialize)
        }
    }

    /// Decodes the envelope to an untyped `serde_json::Value`, without
    /// deserializing `data` into a `Session`. Used to inspect `version` and
    /// hand the raw `data` payload to the migration framework before a
    /// version mismatch would otherwise fail a typed deserialize.
    pub fn peek_raw(bytes: &[u8]) -> Result<serde_json::Value, EnvelopeError> {
        if is_gzip(bytes) {
            let mut decoder = GzDecoder::new(bytes);
            let mut json = Vec::new();
            decoder.read_to_end(&mut json).map_err(EnvelopeError::Decompress)?;
            serde_json::from_slice(&json).map_err(EnvelopeError::Deserialize)
        } else {
            serde_json::from_slice(bytes).map_err(EnvelopeError::Deserialize)
        }
    }

    pub fn verify_checksum(&self) -> Result<(), EnvelopeError> {
        let Some(expected) = &self.checksum else {
            return Ok(());
        };
        let payload = serde_json::to_vec(&self.data).map_err(EnvelopeError::Serialize)?;
        let computed = hex::encode(Sha256::digest(&payload));
        if &computed != expected {
            return Err(EnvelopeError::ChecksumMismatch {
                expected: expected.clone(),
                computed,
            });
        }
        Ok(())
    }
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Session;

    #[test]
    fn round_trips_uncompressed() {
        let envelope = SessionEnvelope::new(Session::new("openai", "gpt-test", "/repo"));
        let bytes = envelope.to_bytes().unwrap();
        let parsed = SessionEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.data.id, envelope.data.id);
    }

    #[test]
    fn round_trips_compressed() {
        let mut envelope = SessionEnvelope::new(Session::new("anthropic", "claude-test", "/repo"));
        envelope.compressed = true;
        let bytes = envelope.to_bytes().unwrap();
        assert!(is_gzip(&bytes));
        let parsed = SessionEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.data.id, envelope.data.id);
    }

    #[test]
    fn checksum_detects_tampering() {
        let envelope = SessionEnvelope::new(Session::new("google", "gemini-test", "/repo"))
            .with_checksum()
            .unwrap();
        assert!(envelope.verify_checksum().is_ok());

        let mut tampered = envelope.clone();
        tampered.data.title = Some("tampered".to_string());
        assert!(matches!(
            tampered.verify_checksum(),
            Err(EnvelopeError::ChecksumMismatch { .. })
        ));
    }
}
