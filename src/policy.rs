use oracle_api::error::{OracleError, OracleResult};
use oracle_api::primitives::DigestHex;
use sysdefs::hashalg;

use crate::bank::{PcrBank, PCR_BANK_REGISTER_MAX};
use crate::digest;

/// TPM2_CC_PolicyPCR, per the TPM library spec's command-code table.
pub const TPM2_CC_POLICY_PCR: u32 = 0x0000_017F;
/// TPM2_CC_PolicyAuthorize.
pub const TPM2_CC_POLICY_AUTHORIZE: u32 = 0x0000_016A;

/// The result of folding a PCR selection into a policy session digest.
#[derive(Debug, Clone)]
pub struct Policy {
    pub policy_alg: String,
    pub pcr_selection: Vec<u8>,
    pub pcr_digest: DigestHex,
    pub policy_digest: DigestHex,
}

/// `TPML_PCR_SELECTION` marshaling for one bank: `hash: u16 (BE)`,
/// `sizeofSelect: u8`, `pcrSelect: [u8; sizeofSelect]` with bit `j` of byte
/// `i` meaning PCR `(i*8 + j)` is selected.
fn marshal_selection(bank: &PcrBank) -> OracleResult<Vec<u8>> {
    let info = hashalg::digest_by_name(bank.algo())
        .map_err(|_| OracleError::UnknownAlgo(bank.algo().to_string()))?;
    let size_of_select = PCR_BANK_REGISTER_MAX / 8;
    let mut select = vec![0u8; size_of_select];
    for i in 0..PCR_BANK_REGISTER_MAX {
        if bank.wants_pcr(i) {
            select[i / 8] |= 1 << (i % 8);
        }
    }

    let mut bytes = Vec::with_capacity(2 + 1 + size_of_select);
    bytes.extend_from_slice(&info.tpm_alg_id.to_be_bytes());
    bytes.push(size_of_select as u8);
    bytes.extend_from_slice(&select);
    Ok(bytes)
}

/// Concatenates the raw digest bytes of every selected register, in
/// canonical (bank algorithm id ascending, index ascending) order.
fn concatenate_selected(banks: &[&PcrBank]) -> OracleResult<Vec<u8>> {
    let mut ordered: Vec<&&PcrBank> = banks.iter().collect();
    ordered.sort_by_key(|b| hashalg::digest_by_name(b.algo()).map(|i| i.tpm_alg_id).unwrap_or(0));

    let mut out = Vec::new();
    for bank in ordered {
        for i in 0..PCR_BANK_REGISTER_MAX {
            if bank.wants_pcr(i) {
                if let Some(digest) = bank.get(i) {
                    out.extend_from_slice(&digest.to_bytes());
                }
            }
        }
    }
    Ok(out)
}

/// Builds a `TPM2_PolicyPCR` digest over one or more PCR banks, following
/// §4.7: form the selection, hash the concatenated register values, fold
/// both into the pcr digest, then extend a zero session digest with the
/// command code, selection, and pcr digest.
pub fn build_policy(banks: &[&PcrBank], policy_alg: &str) -> OracleResult<Policy> {
    // A single TPML_PCR_SELECTION entry per bank, concatenated in the same
    // canonical order used for the register concatenation.
    let mut ordered: Vec<&&PcrBank> = banks.iter().collect();
    ordered.sort_by_key(|b| hashalg::digest_by_name(b.algo()).map(|i| i.tpm_alg_id).unwrap_or(0));

    let mut pcr_selection = Vec::new();
    pcr_selection.extend_from_slice(&(ordered.len() as u32).to_be_bytes());
    for bank in &ordered {
        pcr_selection.extend_from_slice(&marshal_selection(bank)?);
    }

    let concatenation = concatenate_selected(banks)?;
    let concat_digest = digest::digest(policy_alg, &concatenation)?;

    let mut pcr_digest_input = Vec::new();
    pcr_digest_input.extend_from_slice(&pcr_selection);
    pcr_digest_input.extend_from_slice(&concat_digest.to_bytes());
    let pcr_digest = digest::digest(policy_alg, &pcr_digest_input)?;

    let zero = digest::zero_digest(policy_alg)?;
    let mut fold_input = Vec::new();
    fold_input.extend_from_slice(&TPM2_CC_POLICY_PCR.to_be_bytes());
    fold_input.extend_from_slice(&pcr_selection);
    fold_input.extend_from_slice(&pcr_digest.to_bytes());
    let policy_digest = digest::extend(policy_alg, &zero, &fold_input)?;

    Ok(Policy {
        policy_alg: policy_alg.to_string(),
        pcr_selection,
        pcr_digest,
        policy_digest,
    })
}

/// Extends a `PolicyPCR` digest with `TPM2_PolicyAuthorize`, producing the
/// outer digest a signed, rotatable policy actually commits to.
pub fn authorize_policy(policy: &Policy, key_name: &[u8], policy_ref: &[u8]) -> OracleResult<DigestHex> {
    let mut fold_input = Vec::new();
    fold_input.extend_from_slice(&TPM2_CC_POLICY_AUTHORIZE.to_be_bytes());
    fold_input.extend_from_slice(key_name);
    fold_input.extend_from_slice(policy_ref);
    digest::extend(&policy.policy_alg, &policy.policy_digest, &fold_input)
}

/// Checks whether a live bank's registers match the digests a policy was
/// built over — the runtime half of unsealing.
pub fn matches_policy(banks: &[&PcrBank], policy_alg: &str, policy: &Policy) -> OracleResult<bool> {
    let recomputed = build_policy(banks, policy_alg)?;
    Ok(recomputed.policy_digest == policy.policy_digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_digest_is_deterministic() {
        let mut bank = PcrBank::init_from_zero("sha256", 0b1_0101).unwrap();
        bank.extend(0, b"measurement").unwrap();

        let a = build_policy(&[&bank], "sha256").unwrap();
        let b = build_policy(&[&bank], "sha256").unwrap();
        assert_eq!(a.policy_digest, b.policy_digest);
    }

    #[test]
    fn policy_digest_changes_with_register_contents() {
        let mut bank_a = PcrBank::init_from_zero("sha256", 0b1).unwrap();
        bank_a.extend(0, b"first").unwrap();
        let mut bank_b = PcrBank::init_from_zero("sha256", 0b1).unwrap();
        bank_b.extend(0, b"second").unwrap();

        let a = build_policy(&[&bank_a], "sha256").unwrap();
        let b = build_policy(&[&bank_b], "sha256").unwrap();
        assert_ne!(a.policy_digest, b.policy_digest);
    }

    #[test]
    fn matches_policy_detects_drift() {
        let mut bank = PcrBank::init_from_zero("sha256", 0b1).unwrap();
        bank.extend(0, b"measurement").unwrap();
        let policy = build_policy(&[&bank], "sha256").unwrap();

        assert!(matches_policy(&[&bank], "sha256", &policy).unwrap());

        let mut drifted = PcrBank::init_from_zero("sha256", 0b1).unwrap();
        drifted.extend(0, b"different").unwrap();
        assert!(!matches_policy(&[&drifted], "sha256", &policy).unwrap());
    }

    #[test]
    fn authorize_changes_the_outer_digest() {
        let mut bank = PcrBank::init_from_zero("sha256", 0b1).unwrap();
        bank.extend(0, b"measurement").unwrap();
        let policy = build_policy(&[&bank], "sha256").unwrap();
        let outer = authorize_policy(&policy, b"key-name", b"policy-ref").unwrap();
        assert_ne!(outer, policy.policy_digest);
    }
}
