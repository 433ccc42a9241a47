use std::io::{BufRead, Write};

use oracle_api::error::{OracleError, OracleResult};
use oracle_api::primitives::DigestHex;

use crate::digest;

pub const PCR_BANK_REGISTER_MAX: usize = 24;

/// One hash algorithm's worth of PCR registers.
///
/// `interest_mask` bit *i* means the caller wants register *i* predicted;
/// `valid_mask` bit *i* means that slot has been written at least once.
/// Extending an as-yet-invalid register first zero-fills it, mirroring how
/// a TPM's PCRs reset to zero (or a locality byte) at the start of a boot.
#[derive(Debug, Clone)]
pub struct PcrBank {
    algo: String,
    interest_mask: u32,
    valid_mask: u32,
    registers: Vec<Option<DigestHex>>,
}

impl PcrBank {
    pub fn new(algo: &str, interest_mask: u32) -> OracleResult<Self> {
        digest::algo_info(algo)?;
        Ok(PcrBank {
            algo: algo.to_string(),
            interest_mask,
            valid_mask: 0,
            registers: vec![None; PCR_BANK_REGISTER_MAX],
        })
    }

    pub fn algo(&self) -> &str {
        &self.algo
    }

    pub fn interest_mask(&self) -> u32 {
        self.interest_mask
    }

    pub fn wants_pcr(&self, index: usize) -> bool {
        index < PCR_BANK_REGISTER_MAX && (self.interest_mask & (1 << index)) != 0
    }

    pub fn is_valid(&self, index: usize) -> bool {
        index < PCR_BANK_REGISTER_MAX && (self.valid_mask & (1 << index)) != 0
    }

    pub fn get(&self, index: usize) -> Option<&DigestHex> {
        self.registers.get(index).and_then(|r| r.as_ref())
    }

    fn mark_valid(&mut self, index: usize) {
        self.valid_mask |= 1 << index;
    }

    /// `PCR[index] <- H(PCR[index] ‖ data)`. Requires the bank to be
    /// interested in `index`; the predictor never extends a register the
    /// caller didn't ask to track.
    pub fn extend(&mut self, index: usize, data: &[u8]) -> OracleResult<()> {
        if index >= PCR_BANK_REGISTER_MAX {
            return Err(OracleError::MalformedLog(format!(
                "PCR index {index} out of range"
            )));
        }
        if !self.wants_pcr(index) {
            return Ok(());
        }

        let prev = match &self.registers[index] {
            Some(d) => d.clone(),
            None => digest::zero_digest(&self.algo)?,
        };
        let next = digest::extend(&self.algo, &prev, data)?;
        self.registers[index] = Some(next);
        self.mark_valid(index);
        Ok(())
    }

    /// Sets register `index` to all-zero bytes except the last, which holds
    /// `locality` — what a TPM does to PCR 0 when the CRTM records a
    /// locality transition before any other measurement.
    pub fn set_locality(&mut self, index: usize, locality: u8) -> OracleResult<()> {
        if index >= PCR_BANK_REGISTER_MAX {
            return Err(OracleError::MalformedLog(format!(
                "PCR index {index} out of range"
            )));
        }
        let info = digest::algo_info(&self.algo)?;
        let mut bytes = vec![0u8; info.digest_size];
        bytes[info.digest_size - 1] = locality;
        self.registers[index] = Some(DigestHex::from_bytes(&bytes));
        self.mark_valid(index);
        Ok(())
    }

    pub fn init_from_zero(algo: &str, interest_mask: u32) -> OracleResult<Self> {
        let mut bank = PcrBank::new(algo, interest_mask)?;
        let zero = digest::zero_digest(algo)?;
        for i in 0..PCR_BANK_REGISTER_MAX {
            if bank.wants_pcr(i) {
                bank.registers[i] = Some(zero.clone());
                bank.mark_valid(i);
            }
        }
        Ok(bank)
    }

    /// Parses a PCR snapshot file: lines of `"idx algo hex\n"`, as emitted
    /// both by `pcr-oracle show-log`/record mode and by a real TPM's
    /// `pcr_read` wrapper.
    pub fn init_from_snapshot<R: BufRead>(
        algo: &str,
        interest_mask: u32,
        reader: R,
    ) -> OracleResult<Self> {
        let mut bank = PcrBank::new(algo, interest_mask)?;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let idx: usize = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| OracleError::MalformedLog(format!("bad snapshot line: {line}")))?;
            let line_algo = parts
                .next()
                .ok_or_else(|| OracleError::MalformedLog(format!("bad snapshot line: {line}")))?;
            let hex_digest = parts
                .next()
                .ok_or_else(|| OracleError::MalformedLog(format!("bad snapshot line: {line}")))?;

            if line_algo != algo {
                continue;
            }
            let bytes = hex::decode(hex_digest)
                .map_err(|e| OracleError::MalformedLog(format!("bad hex in snapshot: {e}")))?;
            if idx < PCR_BANK_REGISTER_MAX && bank.wants_pcr(idx) {
                bank.registers[idx] = Some(DigestHex::from_bytes(&bytes));
                bank.mark_valid(idx);
            }
        }
        Ok(bank)
    }

    /// Serializes valid registers as `"idx algo hex\n"` lines, the inverse of
    /// `init_from_snapshot`, used both for `--output` snapshot files and for
    /// `PCR_ORACLE_RECORD_PCRS` playback fixtures.
    pub fn write_snapshot<W: Write>(&self, mut writer: W) -> OracleResult<()> {
        for i in 0..PCR_BANK_REGISTER_MAX {
            if let Some(d) = &self.registers[i] {
                writeln!(writer, "{} {} {}", i, self.algo, d.as_str())?;
            }
        }
        Ok(())
    }
}
