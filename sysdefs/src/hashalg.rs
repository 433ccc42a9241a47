use anyhow::{bail, Error};

/// Static descriptor for a TPM-recognized hash algorithm: its canonical
/// lowercase name, its `TPM_ALG_ID` value, and its digest size in bytes.
///
/// This mirrors `tpm_algo_info_t` from the original C tool's `digest.h`; the
/// table below is a frozen `const` slice rather than a runtime registry,
/// since the algorithm set a TPM 2.0 implementation can expose is fixed at
/// compile time for this crate's purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashAlgInfo {
    pub name: &'static str,
    pub tpm_alg_id: u16,
    pub digest_size: usize,
}

pub const TPM_ALG_SHA1: u16 = 0x0004;
pub const TPM_ALG_SHA256: u16 = 0x000b;
pub const TPM_ALG_SHA384: u16 = 0x000c;
pub const TPM_ALG_SHA512: u16 = 0x000d;

const ALGORITHMS: &[HashAlgInfo] = &[
    HashAlgInfo {
        name: "sha1",
        tpm_alg_id: TPM_ALG_SHA1,
        digest_size: 20,
    },
    HashAlgInfo {
        name: "sha256",
        tpm_alg_id: TPM_ALG_SHA256,
        digest_size: 32,
    },
    HashAlgInfo {
        name: "sha384",
        tpm_alg_id: TPM_ALG_SHA384,
        digest_size: 48,
    },
    HashAlgInfo {
        name: "sha512",
        tpm_alg_id: TPM_ALG_SHA512,
        digest_size: 64,
    },
];

pub fn digest_by_name(name: &str) -> Result<HashAlgInfo, Error> {
    ALGORITHMS
        .iter()
        .find(|a| a.name == name)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("unknown hash algorithm '{}'", name))
}

pub fn digest_by_tpm_id(id: u16) -> Result<HashAlgInfo, Error> {
    ALGORITHMS
        .iter()
        .find(|a| a.tpm_alg_id == id)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("unknown TPM algorithm id {:#06x}", id))
}

pub fn all_algorithms() -> &'static [HashAlgInfo] {
    ALGORITHMS
}

/// Resolves a name to one of the digest sizes above without returning the
/// full descriptor, for call sites that only need to allocate a buffer.
pub fn digest_size_for(name: &str) -> Result<usize, Error> {
    match digest_by_name(name) {
        Ok(info) => Ok(info.digest_size),
        Err(_) => bail!("unknown hash algorithm '{}'", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_has_32_byte_digests() {
        let info = digest_by_name("sha256").unwrap();
        assert_eq!(info.digest_size, 32);
        assert_eq!(info.tpm_alg_id, TPM_ALG_SHA256);
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(digest_by_name("sha3-256").is_err());
    }

    #[test]
    fn tpm_id_round_trips_to_name() {
        let info = digest_by_tpm_id(TPM_ALG_SHA384).unwrap();
        assert_eq!(info.name, "sha384");
    }
}
