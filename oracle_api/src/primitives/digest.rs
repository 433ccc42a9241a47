use serde::Serialize;

/// A hex-encoded digest of a caller-specified byte length.
///
/// Generalizes the fixed-width `Sha256Hash`/`Sha384Hash` newtype pattern used
/// elsewhere in this codebase's API crate to any algorithm's digest size,
/// since this crate deals with several algorithms (sha1/sha256/sha384/sha512)
/// side by side in the same PCR bank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DigestHex(String);

impl DigestHex {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        DigestHex(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).expect("DigestHex invariant: always valid hex")
    }

    pub fn byte_len(&self) -> usize {
        self.0.len() / 2
    }
}

impl PartialEq<&str> for DigestHex {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for DigestHex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for DigestHex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.len() % 2 != 0 {
            return Err(serde::de::Error::custom("hex digest must have even length"));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(serde::de::Error::custom("expected hexadecimal string"));
        }
        Ok(DigestHex(s.to_ascii_lowercase()))
    }
}
