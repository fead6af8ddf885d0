//! Byte templates with `%key` / `%payload` placeholders

use crate::error::{Error, Result};

const KEY_TOKEN: &str = "%key";
const PAYLOAD_TOKEN: &str = "%payload";

/// Compiled byte template
///
/// `bytes` holds the template with a zero byte at both placeholder positions.
/// Offsets are byte positions inside `bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteTemplate {
    bytes: Vec<u8>,
    key_offset: usize,
    payload_offset: usize,
}

impl ByteTemplate {
    /// Parse a template such as `"B0 %key %payload"`
    ///
    /// Every whitespace-delimited group is either one hex byte or one of the
    /// two placeholders, and each placeholder appears exactly once.
    pub fn parse(template: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut key_offset = None;
        let mut payload_offset = None;

        for (idx, group) in template.split_whitespace().enumerate() {
            match group {
                KEY_TOKEN => {
                    if key_offset.replace(idx).is_some() {
                        return Err(decode_error(template, "duplicate %key token"));
                    }
                    bytes.push(0);
                }
                PAYLOAD_TOKEN => {
                    if payload_offset.replace(idx).is_some() {
                        return Err(decode_error(template, "duplicate %payload token"));
                    }
                    bytes.push(0);
                }
                hex_pair => {
                    let decoded = hex::decode(hex_pair).map_err(|e| {
                        decode_error(template, &format!("invalid byte group '{}': {}", hex_pair, e))
                    })?;
                    if decoded.len() != 1 {
                        return Err(decode_error(
                            template,
                            &format!("byte group '{}' is not a single byte", hex_pair),
                        ));
                    }
                    bytes.push(decoded[0]);
                }
            }
        }

        let key_offset = key_offset.ok_or_else(|| decode_error(template, "missing %key token"))?;
        let payload_offset =
            payload_offset.ok_or_else(|| decode_error(template, "missing %payload token"))?;

        Ok(Self {
            bytes,
            key_offset,
            payload_offset,
        })
    }

    /// Produce the wire bytes for one key and one color payload
    ///
    /// The compiled template is never mutated; output length is
    /// `len + payload.len() - 1`.
    pub fn render(&self, key: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes.len() + payload.len());

        out.extend_from_slice(&self.bytes[..self.payload_offset]);
        out.extend_from_slice(payload);
        out.extend_from_slice(&self.bytes[self.payload_offset + 1..]);

        // Bytes after the payload slot moved by len(payload) - 1
        let key_at = if self.key_offset < self.payload_offset {
            self.key_offset
        } else {
            self.key_offset + payload.len() - 1
        };
        out[key_at] = key;

        out
    }
}

/// Decode a color payload: a hex string where whitespace is ignored
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let compact: String = payload.split_whitespace().collect();
    hex::decode(&compact)
        .map_err(|e| Error::ConfigDecode(format!("invalid payload '{}': {}", payload, e)))
}

fn decode_error(template: &str, reason: &str) -> Error {
    Error::ConfigDecode(format!("template '{}': {}", template, reason))
}
