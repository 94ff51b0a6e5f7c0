//! Upload tokens.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;

use crate::item::{parse_byte_sequence, serialize_byte_sequence, FieldError};

/// An opaque client-chosen identifier naming a logical upload across
/// transactions.
///
/// The wire form is a structured-field byte sequence (`Upload-Token`
/// header); the path form used in upload resource URLs is unpadded
/// base64url. Equality and hashing are over the decoded octets, so two
/// spellings of the same octets identify the same upload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UploadToken(Bytes);

impl UploadToken {
    /// Build a token from raw octets.
    pub fn new(octets: impl Into<Bytes>) -> Self {
        Self(octets.into())
    }

    /// Parse the `Upload-Token` header value (sf-binary).
    pub fn from_field_value(value: &str) -> Result<Self, FieldError> {
        let octets = parse_byte_sequence(value)?;
        if octets.is_empty() {
            return Err(FieldError::ByteSequence);
        }
        Ok(Self(Bytes::from(octets)))
    }

    /// Parse the token from an upload resource path segment (unpadded
    /// base64url).
    pub fn from_path_segment(segment: &str) -> Result<Self, FieldError> {
        let octets = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|_| FieldError::ByteSequence)?;
        if octets.is_empty() {
            return Err(FieldError::ByteSequence);
        }
        Ok(Self(Bytes::from(octets)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical header serialization (sf-binary).
    pub fn to_field_value(&self) -> String {
        serialize_byte_sequence(&self.0)
    }

    /// Path segment for the upload resource URL.
    pub fn to_path_segment(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl fmt::Debug for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadToken({})", self.to_path_segment())
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path_segment())
    }
}
