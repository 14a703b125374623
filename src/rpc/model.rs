use crate::registry::acme::Challenge;
use base64::engine::general_purpose;
use base64::{alphabet, engine, DecodeError, Engine};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Register a set of challenges for the lifetime of the connection.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub challenges: Vec<Challenge>,
}

/// Publish (or refresh) a DKIM public key.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DkimAnnounce {
    pub provider: String,
    pub public_key: String,
}

/// Reply to every request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    #[must_use]
    pub fn ok() -> Self {
        Ack { error: None }
    }

    #[must_use]
    pub fn error(err: impl Display) -> Self {
        Ack {
            error: Some(err.to_string()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ValueValidationError {
    #[error("invalid encoding: {0}")]
    InvalidEncoding(DecodeError),
    #[error("invalid decoded length: found {actual} bytes, expected {expected}")]
    InvalidDecodedLength { actual: usize, expected: usize },
    #[error("empty value")]
    Empty,
}

const DNS01_DECODED_LEN_BYTES: usize = 32;

lazy_static! {
    static ref DNS01_ENGINE: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);
}

impl Challenge {
    /// Check that `value` is a [RFC-8555] DNS-01 key authorization digest:
    /// an unpadded base64url encoded SHA-256 hash.
    ///
    /// [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
    ///
    /// # Errors
    ///
    /// [`ValueValidationError`] describing what is wrong with the value.
    pub fn valid_dns01(&self) -> Result<(), ValueValidationError> {
        match DNS01_ENGINE.decode(&self.value) {
            Ok(raw) => match raw.len() {
                DNS01_DECODED_LEN_BYTES => Ok(()),
                _ => Err(ValueValidationError::InvalidDecodedLength {
                    actual: raw.len(),
                    expected: DNS01_DECODED_LEN_BYTES,
                }),
            },
            Err(err) => Err(ValueValidationError::InvalidEncoding(err)),
        }
    }
}

impl DkimAnnounce {
    /// Check that the key is non-empty standard base64, as DKIM `p=` tags require.
    ///
    /// # Errors
    ///
    /// [`ValueValidationError`] describing what is wrong with the key.
    pub fn valid_key(&self) -> Result<(), ValueValidationError> {
        if self.public_key.is_empty() {
            return Err(ValueValidationError::Empty);
        }
        general_purpose::STANDARD
            .decode(&self.public_key)
            .map(|_| ())
            .map_err(ValueValidationError::InvalidEncoding)
    }
}
