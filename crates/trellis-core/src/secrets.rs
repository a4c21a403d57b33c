//! Scoped credential values.

use crate::{Error, Result};
use std::fmt;

/// A credential value scoped to gate-required runners.
///
/// Debug and Display never reveal the value, so a credential cannot reach
/// logs or rendered reports by accident.
#[derive(Clone)]
pub struct SecretValue {
    value: String,
}

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Read a credential from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        std::env::var(var)
            .map(Self::new)
            .map_err(|_| Error::MissingCredential(var.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_masked() {
        let secret = SecretValue::new("hunter2");
        assert_eq!(format!("{:?}", secret), "SecretValue(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_from_env_missing() {
        let err = SecretValue::from_env("TRELLIS_TEST_UNSET_VAR").unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)));
    }
}
