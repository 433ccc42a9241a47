use oracle_api::error::{OracleError, OracleResult};
use oracle_api::primitives::DigestHex;
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use sysdefs::hashalg::{self, HashAlgInfo};

/// A running hash over one of the four algorithms a TPM 2.0 PCR bank may
/// carry, selected by name at construction time.
///
/// Kept as an enum over concrete `sha1`/`sha2` hasher types rather than a
/// `Box<dyn ...>` — the algorithm set is closed and known at compile time, so
/// dynamic dispatch buys nothing here.
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algo: &str) -> OracleResult<Self> {
        match algo {
            "sha1" => Ok(Hasher::Sha1(Sha1::new())),
            "sha256" => Ok(Hasher::Sha256(Sha256::new())),
            "sha384" => Ok(Hasher::Sha384(Sha384::new())),
            "sha512" => Ok(Hasher::Sha512(Sha512::new())),
            other => Err(OracleError::UnknownAlgo(other.to_string())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> DigestHex {
        match self {
            Hasher::Sha1(h) => DigestHex::from_bytes(&h.finalize()),
            Hasher::Sha256(h) => DigestHex::from_bytes(&h.finalize()),
            Hasher::Sha384(h) => DigestHex::from_bytes(&h.finalize()),
            Hasher::Sha512(h) => DigestHex::from_bytes(&h.finalize()),
        }
    }
}

/// Computes `H(data)` in one shot for the named algorithm.
pub fn digest(algo: &str, data: &[u8]) -> OracleResult<DigestHex> {
    let mut hasher = Hasher::new(algo)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

/// The TPM extend rule: `H(prev ‖ data)`.
pub fn extend(algo: &str, prev: &DigestHex, data: &[u8]) -> OracleResult<DigestHex> {
    let mut hasher = Hasher::new(algo)?;
    hasher.update(&prev.to_bytes());
    hasher.update(data);
    Ok(hasher.finalize())
}

pub fn zero_digest(algo: &str) -> OracleResult<DigestHex> {
    let info = algo_info(algo)?;
    Ok(DigestHex::from_bytes(&vec![0u8; info.digest_size]))
}

pub fn algo_info(algo: &str) -> OracleResult<HashAlgInfo> {
    hashalg::digest_by_name(algo).map_err(|_| OracleError::UnknownAlgo(algo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input_matches_known_vector() {
        let d = digest("sha256", b"").unwrap();
        assert_eq!(
            d.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn extend_matches_direct_concatenated_hash() {
        let zero = zero_digest("sha256").unwrap();
        let extended = extend("sha256", &zero, b"event-data").unwrap();

        let mut expected_input = zero.to_bytes();
        expected_input.extend_from_slice(b"event-data");
        let expected = digest("sha256", &expected_input).unwrap();

        assert_eq!(extended, expected);
    }

    #[test]
    fn zero_digest_has_correct_size_per_algorithm() {
        assert_eq!(zero_digest("sha1").unwrap().byte_len(), 20);
        assert_eq!(zero_digest("sha256").unwrap().byte_len(), 32);
        assert_eq!(zero_digest("sha384").unwrap().byte_len(), 48);
        assert_eq!(zero_digest("sha512").unwrap().byte_len(), 64);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(Hasher::new("sha3-256").is_err());
    }
}
