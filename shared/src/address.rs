use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{ChainError, Hash256};

/// Endereço de conta com 20 bytes, derivado de uma chave pública secp256k1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Account([u8; 20]);

impl Account {
    /// Creates an account from a 20-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The zero account, used as a placeholder for unknown peers
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 20])
    }

    /// Derives the account from an uncompressed secp256k1 public key:
    /// the low 20 bytes of Keccak-256 over the 64 coordinate bytes.
    #[must_use]
    pub fn from_public_key(uncompressed: &[u8; 65]) -> Self {
        let digest = Hash256::keccak256(&uncompressed[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[12..]);
        Self(bytes)
    }

    /// Returns the raw bytes of the address
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Account {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        // Endereços circulam em caixa mista (checksum); a forma interna é minúscula
        let bytes = hex::decode(stripped.to_lowercase())
            .map_err(|e| ChainError::InvalidAddress(format!("hex inválido: {e}")))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| ChainError::InvalidAddress("expected 20 bytes".to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Account {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AccountVisitor;

        impl Visitor<'_> for AccountVisitor {
            type Value = Account;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a 20-byte hex string, with or without 0x prefix")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Account, E> {
                Account::from_str(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(AccountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_mixed_case_and_prefix() {
        let acc = Account::from_str("0x22ba1F80452E6220c7cc6ea2D1e3EEDDaC5F694A").unwrap();
        assert_eq!(
            acc.to_string(),
            "0x22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a"
        );
        let bare = Account::from_str("22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a").unwrap();
        assert_eq!(acc, bare);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(Account::from_str("0x22ba").is_err());
    }

    #[test]
    fn test_serde_round_trip_as_map_key() {
        use std::collections::HashMap;

        let acc = Account::from_str("0x22ba1F80452E6220c7cc6ea2D1e3EEDDaC5F694A").unwrap();
        let mut balances: HashMap<Account, u64> = HashMap::new();
        balances.insert(acc, 1_000_000);

        let json = serde_json::to_string(&balances).unwrap();
        let back: HashMap<Account, u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[&acc], 1_000_000);
    }

    #[test]
    fn test_derivation_uses_low_20_bytes() {
        let mut key = [4u8; 65];
        key[0] = 0x04;
        let acc = Account::from_public_key(&key);
        let digest = Hash256::keccak256(&key[1..]);
        assert_eq!(acc.as_bytes(), &digest.as_bytes()[12..]);
    }
}
