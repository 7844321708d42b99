use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::RegistryError;

/// Hardware identifier of a physical device, e.g. `b8:27:eb:a5:be:48`
///
/// The string is kept exactly as the client sent it. Validation is separate
/// from deserialization so that a malformed MAC in a request body surfaces as
/// an invalid parameter rather than a binding failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacId(String);

impl MacId {
    /// Wrap a string without validating it
    pub fn new(mac: impl Into<String>) -> Self {
        Self(mac.into())
    }

    /// Wrap a string, rejecting it unless it is a well-formed MAC
    pub fn parse(mac: &str) -> Result<Self, RegistryError> {
        let mac = Self::new(mac);
        if mac.is_valid() {
            Ok(mac)
        } else {
            Err(RegistryError::InvalidParam(format!("invalid MAC id {}", mac)))
        }
    }

    /// Six hex pairs separated by `:` or `-`
    pub fn is_valid(&self) -> bool {
        let bytes = self.0.as_bytes();
        if bytes.len() != 17 {
            return false;
        }

        bytes.iter().enumerate().all(|(i, b)| {
            if i % 3 == 2 {
                *b == b':' || *b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MacId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
