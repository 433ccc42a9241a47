use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use osutils::dependencies::Dependency;
use osutils::exe::RunAndCheck;

use oracle_api::error::{OracleError, OracleResult};
use oracle_api::primitives::DigestHex;

use crate::config::Env;
use crate::digest;

/// What any TPM 2.0 transport this crate talks to must support: reading the
/// current PCR bank, sealing/unsealing a blob under a policy, and
/// signing/verifying with the key the authorized-policy path needs.
///
/// `unseal` takes the PCR selection and public key alongside the sealed
/// blob, rather than a policy digest, because a real TPM recomputes and
/// checks the policy digest itself inside `tpm2_policypcr`/`tpm2_unseal` -
/// the caller doesn't hold one to pass in.
pub trait TpmTransport {
    fn pcr_read(&mut self, algo: &str, index: usize) -> OracleResult<DigestHex>;
    fn seal(&mut self, policy_digest: &DigestHex, secret: &[u8]) -> OracleResult<Vec<u8>>;
    fn unseal(&mut self, pcr_selection: &str, pubkey: &[u8], sealed: &[u8]) -> OracleResult<Vec<u8>>;
    fn sign(&mut self, data: &[u8]) -> OracleResult<Vec<u8>>;
    fn public_key(&mut self) -> OracleResult<Vec<u8>>;
}

/// Builds a `tpm2-tools`-style PCR selection spec (`"sha256:0,2,4,7"`) from
/// an algorithm name and a PCR bitmask.
pub fn pcr_selection_spec(algo: &str, mask: u32) -> String {
    let indices: Vec<String> = (0..24)
        .filter(|i| mask & (1 << i) != 0)
        .map(|i| i.to_string())
        .collect();
    format!("{algo}:{}", indices.join(","))
}

fn tpm_error(message: impl Into<String>) -> OracleError {
    OracleError::TpmError {
        tss_rc: 0,
        message: message.into(),
    }
}

/// Wraps a real TPM (reached by shelling out to `tpm2-tools`, the same
/// process-boundary idiom this codebase's `osutils` layer uses for
/// `cryptsetup`/`efivar`) with the record/playback machinery described in
/// §5: recorded reads go to `Env::record_pcrs`, played-back reads come
/// entirely from `Env::play_pcrs` without touching hardware.
pub struct RecordPlaybackTransport {
    env: Env,
    playback: Option<Vec<(usize, String, DigestHex)>>,
    last_pub: Option<Vec<u8>>,
    last_priv: Option<Vec<u8>>,
}

impl RecordPlaybackTransport {
    pub fn new(env: Env) -> OracleResult<Self> {
        let playback = match &env.play_pcrs {
            Some(path) => Some(load_playback_file(path)?),
            None => None,
        };
        Ok(RecordPlaybackTransport {
            env,
            playback,
            last_pub: None,
            last_priv: None,
        })
    }

    fn silence_tss2_log(&self, cmd: &mut std::process::Command) {
        if self.env.tss2_log_silenced {
            cmd.env("TSS2_LOG", "esys+none,tcti+none");
        }
    }

    /// Creates a fresh primary key under the owner hierarchy in `dir`,
    /// returning its context file path. Uses the RSA default template, so
    /// repeated calls against the same TPM produce the same primary (the
    /// TPM's primary-key derivation is deterministic given the same seed and
    /// template), matching a fresh `tpm2_createprimary` invocation on the
    /// command line.
    fn create_primary(&self, dir: &std::path::Path) -> OracleResult<PathBuf> {
        let ctx = dir.join("primary.ctx");
        let mut cmd = Dependency::Tpm2CreatePrimary.cmd();
        cmd.args(["-c", ctx.to_str().unwrap()]);
        self.silence_tss2_log(&mut cmd);
        cmd.run_and_check().map_err(|e| tpm_error(e.to_string()))?;
        Ok(ctx)
    }

    fn record(&self, index: usize, algo: &str, digest: &DigestHex) -> OracleResult<()> {
        let Some(path) = &self.env.record_pcrs else {
            return Ok(());
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{index} {algo} {}", digest.as_str())?;
        Ok(())
    }
}

fn load_playback_file(path: &PathBuf) -> OracleResult<Vec<(usize, String, DigestHex)>> {
    let file = std::fs::File::open(path)?;
    let mut out = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let idx: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| OracleError::MalformedLog(format!("bad playback line: {line}")))?;
        let algo = parts
            .next()
            .ok_or_else(|| OracleError::MalformedLog(format!("bad playback line: {line}")))?
            .to_string();
        let hex_digest = parts
            .next()
            .ok_or_else(|| OracleError::MalformedLog(format!("bad playback line: {line}")))?;
        let bytes = hex::decode(hex_digest)
            .map_err(|e| OracleError::MalformedLog(format!("bad hex in playback file: {e}")))?;
        out.push((idx, algo, DigestHex::from_bytes(&bytes)));
    }
    Ok(out)
}

impl TpmTransport for RecordPlaybackTransport {
    fn pcr_read(&mut self, algo: &str, index: usize) -> OracleResult<DigestHex> {
        if let Some(playback) = &self.playback {
            return playback
                .iter()
                .find(|(i, a, _)| *i == index && a == algo)
                .map(|(_, _, d)| d.clone())
                .ok_or_else(|| OracleError::MissingFile(PathBuf::from(format!("pcr {index}/{algo} in playback file"))));
        }

        let mut cmd = Dependency::Tpm2PcrRead.cmd();
        cmd.arg(format!("{algo}:{index}"));
        self.silence_tss2_log(&mut cmd);
        let output = cmd.output_and_check().map_err(|e| tpm_error(e.to_string()))?;
        let digest = parse_pcr_read_output(&output, index)?;
        self.record(index, algo, &digest)?;
        Ok(digest)
    }

    fn seal(&mut self, policy_digest: &DigestHex, secret: &[u8]) -> OracleResult<Vec<u8>> {
        let dir = tempfile::tempdir().map_err(|e| tpm_error(e.to_string()))?;
        let primary_ctx = self.create_primary(dir.path())?;

        let policy_file = dir.path().join("policy.digest");
        std::fs::write(&policy_file, policy_digest.to_bytes())?;
        let secret_file = dir.path().join("secret.bin");
        std::fs::write(&secret_file, secret)?;
        let pub_file = dir.path().join("sealed.pub");
        let priv_file = dir.path().join("sealed.priv");

        let mut cmd = Dependency::Tpm2Create.cmd();
        cmd.args(["-C", primary_ctx.to_str().unwrap()])
            .args(["-u", pub_file.to_str().unwrap()])
            .args(["-r", priv_file.to_str().unwrap()])
            .args(["-i", secret_file.to_str().unwrap()])
            .args(["-L", policy_file.to_str().unwrap()]);
        self.silence_tss2_log(&mut cmd);
        cmd.run_and_check().map_err(|e| tpm_error(e.to_string()))?;

        let pubkey = std::fs::read(&pub_file)?;
        let privkey = std::fs::read(&priv_file)?;
        self.last_pub = Some(pubkey);
        self.last_priv = Some(privkey.clone());
        Ok(privkey)
    }

    fn unseal(&mut self, pcr_selection: &str, pubkey: &[u8], sealed: &[u8]) -> OracleResult<Vec<u8>> {
        let dir = tempfile::tempdir().map_err(|e| tpm_error(e.to_string()))?;
        let primary_ctx = self.create_primary(dir.path())?;

        let pub_file = dir.path().join("sealed.pub");
        let priv_file = dir.path().join("sealed.priv");
        std::fs::write(&pub_file, pubkey)?;
        std::fs::write(&priv_file, sealed)?;

        let obj_ctx = dir.path().join("object.ctx");
        let mut cmd = Dependency::Tpm2Load.cmd();
        cmd.args(["-C", primary_ctx.to_str().unwrap()])
            .args(["-u", pub_file.to_str().unwrap()])
            .args(["-r", priv_file.to_str().unwrap()])
            .args(["-c", obj_ctx.to_str().unwrap()]);
        self.silence_tss2_log(&mut cmd);
        cmd.run_and_check().map_err(|e| tpm_error(e.to_string()))?;

        let session_ctx = dir.path().join("session.ctx");
        let mut cmd = Dependency::Tpm2StartAuthSession.cmd();
        cmd.args(["--policy-session", "-S", session_ctx.to_str().unwrap()]);
        self.silence_tss2_log(&mut cmd);
        cmd.run_and_check().map_err(|e| tpm_error(e.to_string()))?;

        let flush_session = || {
            let mut cmd = Dependency::Tpm2FlushContext.cmd();
            cmd.arg(&session_ctx);
            let _ = cmd.run_and_check();
        };

        let mut cmd = Dependency::Tpm2PolicyPcr.cmd();
        cmd.args(["-S", session_ctx.to_str().unwrap()])
            .args(["-l", pcr_selection]);
        self.silence_tss2_log(&mut cmd);
        if let Err(e) = cmd.run_and_check() {
            flush_session();
            return Err(tpm_error(e.to_string()));
        }

        let secret_file = dir.path().join("secret.bin");
        let mut cmd = Dependency::Tpm2Unseal.cmd();
        cmd.arg("-p")
            .arg(format!("session:{}", session_ctx.display()))
            .args(["-c", obj_ctx.to_str().unwrap()])
            .args(["-o", secret_file.to_str().unwrap()]);
        self.silence_tss2_log(&mut cmd);
        let unseal_result = cmd.run_and_check();
        flush_session();
        unseal_result.map_err(|e| tpm_error(e.to_string()))?;

        Ok(std::fs::read(&secret_file)?)
    }

    fn sign(&mut self, data: &[u8]) -> OracleResult<Vec<u8>> {
        let (pubkey, privkey) = match (&self.last_pub, &self.last_priv) {
            (Some(p), Some(r)) => (p.clone(), r.clone()),
            _ => return Err(tpm_error("no sealed key available to sign with in this session")),
        };

        let dir = tempfile::tempdir().map_err(|e| tpm_error(e.to_string()))?;
        let primary_ctx = self.create_primary(dir.path())?;

        let pub_file = dir.path().join("key.pub");
        let priv_file = dir.path().join("key.priv");
        std::fs::write(&pub_file, &pubkey)?;
        std::fs::write(&priv_file, &privkey)?;

        let obj_ctx = dir.path().join("object.ctx");
        let mut cmd = Dependency::Tpm2Load.cmd();
        cmd.args(["-C", primary_ctx.to_str().unwrap()])
            .args(["-u", pub_file.to_str().unwrap()])
            .args(["-r", priv_file.to_str().unwrap()])
            .args(["-c", obj_ctx.to_str().unwrap()]);
        self.silence_tss2_log(&mut cmd);
        cmd.run_and_check().map_err(|e| tpm_error(e.to_string()))?;

        let message_file = dir.path().join("message.bin");
        std::fs::write(&message_file, data)?;
        let sig_file = dir.path().join("signature.bin");

        let mut cmd = Dependency::Tpm2Sign.cmd();
        cmd.args(["-c", obj_ctx.to_str().unwrap()])
            .args(["-g", "sha256"])
            .args(["-o", sig_file.to_str().unwrap()])
            .arg(&message_file);
        self.silence_tss2_log(&mut cmd);
        cmd.run_and_check().map_err(|e| tpm_error(e.to_string()))?;

        Ok(std::fs::read(&sig_file)?)
    }

    fn public_key(&mut self) -> OracleResult<Vec<u8>> {
        self.last_pub
            .clone()
            .ok_or_else(|| tpm_error("no sealed key available in this session; call seal first"))
    }
}

fn parse_pcr_read_output(output: &str, index: usize) -> OracleResult<DigestHex> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(hex_digest) = line.strip_prefix(&format!("  {index} :")) {
            let bytes = hex::decode(hex_digest.trim().replace("0x", ""))
                .map_err(|e| OracleError::MalformedLog(format!("bad tpm2_pcrread hex: {e}")))?;
            return Ok(DigestHex::from_bytes(&bytes));
        }
    }
    Err(OracleError::MalformedLog(format!(
        "tpm2_pcrread output did not contain PCR {index}"
    )))
}

/// An in-memory stand-in used only by tests: `seal`/`unseal` XOR the secret
/// against a keystream derived from the policy digest, so the round-trip
/// property in the testable-properties list is exercisable without any
/// external process or hardware.
#[derive(Debug, Default)]
pub struct SoftwareTestTransport {
    registers: std::collections::HashMap<(String, usize), DigestHex>,
    last_policy_digest: Option<DigestHex>,
}

impl SoftwareTestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, algo: &str, index: usize, value: DigestHex) {
        self.registers.insert((algo.to_string(), index), value);
    }

    fn keystream(policy_digest: &DigestHex, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut counter: u32 = 0;
        while out.len() < len {
            let mut input = policy_digest.to_bytes();
            input.extend_from_slice(&counter.to_be_bytes());
            let block = digest::digest("sha256", &input).expect("sha256 is always available");
            out.extend_from_slice(&block.to_bytes());
            counter += 1;
        }
        out.truncate(len);
        out
    }
}

impl TpmTransport for SoftwareTestTransport {
    fn pcr_read(&mut self, algo: &str, index: usize) -> OracleResult<DigestHex> {
        self.registers
            .get(&(algo.to_string(), index))
            .cloned()
            .ok_or_else(|| OracleError::MissingFile(PathBuf::from(format!("seeded pcr {index}/{algo}"))))
    }

    fn seal(&mut self, policy_digest: &DigestHex, secret: &[u8]) -> OracleResult<Vec<u8>> {
        self.last_policy_digest = Some(policy_digest.clone());
        let keystream = Self::keystream(policy_digest, secret.len());
        Ok(secret.iter().zip(keystream.iter()).map(|(a, b)| a ^ b).collect())
    }

    /// Ignores `pcr_selection`/`pubkey`: this fixture has no real TPM object
    /// to load, so it rebuilds the keystream from the policy digest cached
    /// by the most recent `seal` call on this same instance.
    fn unseal(&mut self, pcr_selection: &str, pubkey: &[u8], sealed: &[u8]) -> OracleResult<Vec<u8>> {
        let _ = pcr_selection;
        let _ = pubkey;
        let policy_digest = self
            .last_policy_digest
            .clone()
            .ok_or_else(|| OracleError::MissingFile(PathBuf::from("no policy digest sealed in this session")))?;
        // XOR is its own inverse.
        self.seal(&policy_digest, sealed)
    }

    fn sign(&mut self, data: &[u8]) -> OracleResult<Vec<u8>> {
        digest::digest("sha256", data).map(|d| d.to_bytes())
    }

    fn public_key(&mut self) -> OracleResult<Vec<u8>> {
        Ok(vec![0u8; 32])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_transport_seal_unseal_round_trips() {
        let mut transport = SoftwareTestTransport::new();
        let policy_digest = digest::digest("sha256", b"some policy").unwrap();
        let secret = b"the sealed secret";

        let sealed = transport.seal(&policy_digest, secret).unwrap();
        assert_ne!(sealed, secret);
        let recovered = transport.unseal("sha256:0,7", &[], &sealed).unwrap();
        assert_eq!(recovered, secret);
    }

    #[test]
    fn software_transport_seal_differs_per_policy() {
        let mut transport = SoftwareTestTransport::new();
        let secret = b"the sealed secret";
        let a = digest::digest("sha256", b"policy a").unwrap();
        let b = digest::digest("sha256", b"policy b").unwrap();

        let sealed_a = transport.seal(&a, secret).unwrap();
        let sealed_b = transport.seal(&b, secret).unwrap();
        assert_ne!(sealed_a, sealed_b);
    }

    #[test]
    fn pcr_selection_spec_lists_set_bits() {
        assert_eq!(pcr_selection_spec("sha256", 0b1001_0101), "sha256:0,2,4,7");
    }

    #[test]
    fn seeded_pcr_read_returns_seeded_value() {
        let mut transport = SoftwareTestTransport::new();
        let value = DigestHex::from_bytes(&[0xAA; 32]);
        transport.seed("sha256", 7, value.clone());
        assert_eq!(transport.pcr_read("sha256", 7).unwrap(), value);
    }

    #[test]
    fn playback_file_satisfies_pcr_read_without_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcrs.txt");
        let digest = DigestHex::from_bytes(&[0xAAu8; 32]);
        std::fs::write(&path, format!("0 sha256 {}\n", digest.as_str())).unwrap();

        let env = Env {
            play_pcrs: Some(path),
            ..Default::default()
        };
        let mut transport = RecordPlaybackTransport::new(env).unwrap();
        assert_eq!(transport.pcr_read("sha256", 0).unwrap(), digest);
    }
}
