//! Git object ids as carried by placeholders and download requests

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length of a hex-encoded SHA-1 object id.
pub const SHA_STRING_LENGTH: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentIdError {
    #[error("content id must be {SHA_STRING_LENGTH} characters, got {0}")]
    InvalidLength(usize),
    #[error("content id is not hex: {0}")]
    InvalidHex(String),
}

/// A validated 40-digit hex object id.
///
/// The original casing is preserved so that ids round-trip through the
/// placeholder table byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as git names objects on disk and on the wire: lowercase hex.
    pub fn object_name(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Path of the loose object relative to an objects directory (`ab/cdef...`).
    pub fn loose_object_path(&self) -> (String, String) {
        let mut name = self.object_name();
        let file = name.split_off(2);
        (name, file)
    }
}

/// Whether `sha` is a well-formed hex object id.
pub fn is_valid_sha_format(sha: &str) -> bool {
    sha.parse::<ContentId>().is_ok()
}

impl FromStr for ContentId {
    type Err = ContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SHA_STRING_LENGTH {
            return Err(ContentIdError::InvalidLength(s.len()));
        }

        let mut raw = [0u8; SHA_STRING_LENGTH / 2];
        hex::decode_to_slice(s, &mut raw).map_err(|e| ContentIdError::InvalidHex(e.to_string()))?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ContentId {
    type Error = ContentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
