//! Identifiers exchanged with callers and with the ledger
//!
//! `LocId` accepts both the hyphenated UUID form and the 128-bit decimal
//! form. `ItemId` and `AccountId` are 32-byte values rendered as `0x` hex.

use crate::errors::{GatewayError, GatewayResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 128-bit identifier of a Legal Officer Case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocId(u128);

impl LocId {
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_u128(self.0)
    }

    pub fn to_decimal_string(&self) -> String {
        self.0.to_string()
    }
}

impl FromStr for LocId {
    type Err = GatewayError;

    fn from_str(s: &str) -> GatewayResult<Self> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u128>()
                .map(LocId)
                .map_err(|_| GatewayError::validation("collectionLocId", "decimal id out of range"));
        }
        Uuid::try_parse(s)
            .map(|uuid| LocId(uuid.as_u128()))
            .map_err(|_| GatewayError::validation("collectionLocId", "expected a UUID"))
    }
}

impl fmt::Display for LocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid().hyphenated())
    }
}

impl Serialize for LocId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LocId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_hex32(field: &str, s: &str) -> GatewayResult<[u8; 32]> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::validation(field, "expected 0x-prefixed hex"))?;
    if digits.len() != 64 {
        return Err(GatewayError::validation(
            field,
            format!("expected 64 hex digits, got {}", digits.len()),
        ));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| GatewayError::validation(field, format!("invalid hex: {e}")))?;
    Ok(out)
}

/// SHA-256 content hash identifying an item within a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId([u8; 32]);

impl ItemId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ItemId {
    type Err = GatewayError;

    fn from_str(s: &str) -> GatewayResult<Self> {
        parse_hex32("itemId", s).map(ItemId)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ledger account, the 32-byte public key of its signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId([u8; 32]);

impl AccountId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for AccountId {
    type Err = GatewayError;

    fn from_str(s: &str) -> GatewayResult<Self> {
        parse_hex32("account", s).map(AccountId)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOC_UUID: &str = "d61e2e12-6c06-4425-aeee-2a0e969ac14e";
    const ITEM: &str = "0x818f1c9cd44ed4ca11f2ede8e865c02a82f9f8a158d8d17368a6818346899705";

    #[test]
    fn loc_id_accepts_uuid_and_decimal_forms() {
        let from_uuid: LocId = LOC_UUID.parse().unwrap();
        let from_decimal: LocId = from_uuid.to_decimal_string().parse().unwrap();
        assert_eq!(from_uuid, from_decimal);
        assert_eq!(from_uuid.to_string(), LOC_UUID);
    }

    #[test]
    fn loc_id_rejects_garbage() {
        for bad in ["", "not-a-uuid", "d61e2e12-6c06-4425-aeee", "-12", "1e10"] {
            let err = bad.parse::<LocId>().unwrap_err();
            assert!(err.is_validation(), "{bad} should be rejected");
        }
        let too_big = format!("{}0", u128::MAX);
        assert!(too_big.parse::<LocId>().is_err());
    }

    #[test]
    fn item_id_requires_prefixed_64_hex_digits() {
        let id: ItemId = ITEM.parse().unwrap();
        assert_eq!(id.to_string(), ITEM);

        assert!("0x12345".parse::<ItemId>().is_err());
        assert!(ITEM.trim_start_matches("0x").parse::<ItemId>().is_err());
        let non_hex = format!("0x{}", "zz".repeat(32));
        assert!(non_hex.parse::<ItemId>().is_err());
    }

    #[test]
    fn item_id_renders_uppercase_input_lowercase() {
        let upper = format!("0x{}", ITEM[2..].to_uppercase());
        let id: ItemId = upper.parse().unwrap();
        assert_eq!(id.to_string(), ITEM);
    }
}
