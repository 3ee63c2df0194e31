//! Wallet address type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::InputError;

/// A participant's wallet address.
///
/// Addresses are normalized on construction (surrounding whitespace trimmed,
/// lowercased) so keys read back from any store compare equal regardless of
/// how the client spelled them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Longest address accepted by [`WalletAddress::parse`].
    pub const MAX_LEN: usize = 128;

    /// Create a normalized address without validation.
    ///
    /// Use this for keys coming back from a store; use [`WalletAddress::parse`]
    /// for untrusted input.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    /// Parse and validate an address from untrusted input.
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let addr = Self::new(raw);
        if addr.is_valid() {
            Ok(addr)
        } else {
            Err(InputError::InvalidAddress(raw.to_string()))
        }
    }

    /// Return the raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate that this address is well-formed.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= Self::MAX_LEN
            && !self.0.chars().any(|c| c.is_whitespace() || c.is_control())
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WalletAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WalletAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_normalizes_case_and_whitespace() {
        let a = WalletAddress::new("  0xABCdef  ");
        assert_eq!(a.as_str(), "0xabcdef");
        assert_eq!(a, WalletAddress::new("0xabcdef"));
    }

    #[test]
    fn parse_rejects_empty_and_whitespace() {
        assert!(WalletAddress::parse("").is_err());
        assert!(WalletAddress::parse("   ").is_err());
        assert!(WalletAddress::parse("0xab cd").is_err());
    }

    #[test]
    fn parse_rejects_overlong() {
        let long = "a".repeat(WalletAddress::MAX_LEN + 1);
        assert_eq!(
            WalletAddress::parse(&long),
            Err(InputError::InvalidAddress(long.clone()))
        );
    }

    #[test]
    fn parse_accepts_mixed_case() {
        let a = WalletAddress::parse("0xDeadBeef").unwrap();
        assert_eq!(a.to_string(), "0xdeadbeef");
    }
}
