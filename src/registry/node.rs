//! Node identities, roles and registry records

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 20-byte account identifier, rendered as `0x`-prefixed hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity([u8; 20]);

impl Identity {
    pub const ZERO: Identity = Identity([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdentityError(pub String);

impl fmt::Display for ParseIdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid identity: {}", self.0)
    }
}

impl std::error::Error for ParseIdentityError {}

impl FromStr for Identity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| ParseIdentityError(e.to_string()))?;
        let array: [u8; 20] = bytes.try_into().map_err(|b: Vec<u8>| {
            ParseIdentityError(format!("expected 20 bytes, got {}", b.len()))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Protocol role a node registers under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Proposer,
    Observer,
    Auditor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Proposer => "proposer",
            Role::Observer => "observer",
            Role::Auditor => "auditor",
        };
        f.write_str(name)
    }
}

/// Registry view of a node, reputation joined in from the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub identity: Identity,
    /// `None` for the not-registered sentinel
    pub role: Option<Role>,
    pub stake: u128,
    pub reputation: i64,
    pub registered: bool,
}

impl Node {
    /// Sentinel returned for identities that never registered
    pub fn unregistered(identity: Identity, reputation: i64) -> Self {
        Self {
            identity,
            role: None,
            stake: 0,
            reputation,
            registered: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_hex_round_trip() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xab;
        bytes[19] = 0x01;
        let id = Identity::new(bytes);

        let rendered = id.to_string();
        assert_eq!(rendered, "0xab00000000000000000000000000000000000001");
        assert_eq!(rendered.parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn test_identity_rejects_wrong_length() {
        assert!("0x1234".parse::<Identity>().is_err());
        assert!("not-hex".parse::<Identity>().is_err());
    }

    #[test]
    fn test_identity_serde_as_string() {
        let id: Identity = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0x00000000000000000000000000000000000000ff\"");
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
