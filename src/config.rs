use std::path::PathBuf;

/// Process environment, read once at startup instead of scattering
/// `std::env::var` calls through the prediction/seal/unseal code paths.
#[derive(Debug, Clone, Default)]
pub struct Env {
    /// `PCR_ORACLE_RECORD_PCRS`: append each `pcr_read` result here as
    /// `idx algo hex` lines.
    pub record_pcrs: Option<PathBuf>,
    /// `PCR_ORACLE_PLAY_PCRS`: satisfy `pcr_read` entirely from this file
    /// instead of talking to the TPM.
    pub play_pcrs: Option<PathBuf>,
    /// `TSS2_LOG`: when set, silences tss2-esys-style chatter from the
    /// external TPM transport.
    pub tss2_log_silenced: bool,
}

impl Env {
    pub fn from_process() -> Self {
        Self {
            record_pcrs: std::env::var_os("PCR_ORACLE_RECORD_PCRS").map(PathBuf::from),
            play_pcrs: std::env::var_os("PCR_ORACLE_PLAY_PCRS").map(PathBuf::from),
            tss2_log_silenced: std::env::var_os("TSS2_LOG").is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_env_has_no_record_or_playback_path() {
        let env = Env::default();
        assert!(env.record_pcrs.is_none());
        assert!(env.play_pcrs.is_none());
        assert!(!env.tss2_log_silenced);
    }
}
