use goblin::pe::PE;

use oracle_api::error::{OracleError, OracleResult};
use oracle_api::primitives::DigestHex;

use crate::digest::Hasher;

/// Computes the Authenticode digest of a PE/COFF image (UEFI spec §32.2.1):
/// the checksum field and the certificate-table data directory (plus the
/// trailing attribute-certificate section it points at) are excluded from
/// the hash, since Secure Boot verifies the same ranges when it checks a
/// signed binary.
///
/// `goblin::pe::PE::authenticode_ranges` already does the range bookkeeping;
/// this function only drives the chosen hash algorithm over the ranges it
/// yields.
pub fn authenticode_digest(algo: &str, image: &[u8]) -> OracleResult<DigestHex> {
    let pe = PE::parse(image)
        .map_err(|e| OracleError::MalformedLog(format!("failed to parse PE image: {e}")))?;

    let mut hasher = Hasher::new(algo)?;
    for slice in pe.authenticode_ranges() {
        hasher.update(slice);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pe_input() {
        assert!(authenticode_digest("sha256", b"not a pe file at all").is_err());
    }
}
