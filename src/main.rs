use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;

use oracle_api::error::{OracleError, OracleResult};
use oracle_api::keyfmt::{StoredKey, StoredKeyFormat};
use oracle_api::platform::TargetPlatform;
use oracle_api::primitives::DigestHex;

use pcr_oracle::bank::PcrBank;
use pcr_oracle::bootentry;
use pcr_oracle::config::Env;
use pcr_oracle::eventlog::EventLog;
use pcr_oracle::keyfile::{self, TpmPolicy, TssPrivKey};
use pcr_oracle::logging;
use pcr_oracle::policy;
use pcr_oracle::scanners::{self, Outcome, ScanContext};
use pcr_oracle::tpm::{pcr_selection_spec, RecordPlaybackTransport, TpmTransport};

#[derive(Parser, Debug)]
#[command(name = "pcr-oracle", version, about = "Predicts and seals TPM 2.0 PCR values against a measured boot event log")]
struct Cli {
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Predicts the PCR bank a future boot will produce.
    Predict(PredictArgs),
    /// Predicts the future PCR bank and seals a secret under its policy.
    Seal(SealArgs),
    /// Unseals a secret, checking the live PCR bank against the stored policy.
    Unseal(UnsealArgs),
    /// Parses and prints a TCG event log.
    ShowLog(ShowLogArgs),
}

#[derive(Parser, Debug)]
struct PredictArgs {
    #[arg(long)]
    event_log: PathBuf,
    #[arg(long, default_value = "tpm2.0")]
    platform: String,
    #[arg(long)]
    pcrs: String,
    #[arg(long, default_value = "sha256")]
    algorithm: String,
    #[arg(long)]
    new_root: Option<PathBuf>,
    #[arg(long)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct SealArgs {
    #[arg(long)]
    event_log: PathBuf,
    #[arg(long, default_value = "tpm2.0")]
    platform: String,
    #[arg(long)]
    pcrs: String,
    #[arg(long, default_value = "sha256")]
    algorithm: String,
    #[arg(long)]
    new_root: Option<PathBuf>,
    #[arg(long)]
    secret_file: PathBuf,
    /// Destination for the sealed key; `pem:`/`native:` prefixes or a `.pem`
    /// suffix select the on-disk format, defaulting to PEM.
    #[arg(long)]
    output: String,
}

#[derive(Parser, Debug)]
struct UnsealArgs {
    /// Sealed key to read; `pem:`/`native:` prefixes or a `.pem` suffix
    /// select the on-disk format, defaulting to PEM.
    #[arg(long)]
    key_file: String,
    #[arg(long)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct ShowLogArgs {
    #[arg(long)]
    event_log: PathBuf,
    #[arg(long)]
    pretty: bool,
}

fn parse_pcr_mask(s: &str) -> OracleResult<u32> {
    if let Some(hex) = s.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16)
            .map_err(|_| OracleError::MalformedLog(format!("invalid PCR mask '{s}'")));
    }
    let mut mask = 0u32;
    for part in s.split(',') {
        let idx: u32 = part
            .trim()
            .parse()
            .map_err(|_| OracleError::MalformedLog(format!("invalid PCR index '{part}' in '{s}'")))?;
        mask |= 1 << idx;
    }
    Ok(mask)
}

/// Replays the event log against a zeroed bank, consulting the scanner
/// dispatch for every event the caller asked to track.
fn predict_bank(
    event_log_path: &PathBuf,
    algorithm: &str,
    mask: u32,
    new_root: Option<PathBuf>,
    uname_machine: &str,
) -> OracleResult<PcrBank> {
    let raw = std::fs::read(event_log_path).map_err(|_| OracleError::MissingFile(event_log_path.clone()))?;
    let log = EventLog::parse(&raw)?;

    let boot_entry = match &new_root {
        Some(root) => bootentry::resolve_entries(root, None, uname_machine)?.into_iter().next(),
        None => None,
    };

    let ctx = ScanContext {
        new_root,
        variable_overlay: Default::default(),
        boot_entry,
        algorithms: vec![algorithm.to_string()],
    };

    let mut bank = PcrBank::init_from_zero(algorithm, mask)?;
    for (i, event) in log.events.iter().enumerate() {
        if !bank.wants_pcr(event.pcr_index as usize) {
            continue;
        }
        let outcome = scanners::scan(event, i, &ctx)?;
        let leaf_digest: DigestHex = match outcome {
            Outcome::UseOriginalDigest => event
                .digest_for(algorithm)
                .cloned()
                .ok_or_else(|| OracleError::MalformedLog(format!("event #{i} carries no {algorithm} digest")))?,
            Outcome::Replace(map) => map
                .get(algorithm)
                .cloned()
                .ok_or_else(|| OracleError::PredictionFailed { event_index: i, reason: format!("scanner produced no {algorithm} digest") })?,
        };
        bank.extend(event.pcr_index as usize, &leaf_digest.to_bytes())?;
    }
    Ok(bank)
}

fn uname_machine() -> String {
    osutils::uname::machine().unwrap_or_else(|_| std::env::consts::ARCH.to_string())
}

/// `TpmPolicy.command_policy` for the single `PolicyPCR` entry this crate
/// writes: the hash algorithm name, length-prefixed, followed by the
/// little-endian PCR selection mask. Storing these instead of a frozen
/// digest means unsealing recomputes the policy from *live* PCR reads,
/// which is the entire point of binding a secret to measured boot state.
fn encode_policy_params(policy_alg: &str, mask: u32) -> Vec<u8> {
    let mut out = vec![policy_alg.len() as u8];
    out.extend_from_slice(policy_alg.as_bytes());
    out.extend_from_slice(&mask.to_le_bytes());
    out
}

fn decode_policy_params(bytes: &[u8]) -> OracleResult<(String, u32)> {
    let err = || OracleError::MalformedLog("malformed PolicyPCR command_policy".into());
    let len = *bytes.first().ok_or_else(err)? as usize;
    let algo_bytes = bytes.get(1..1 + len).ok_or_else(err)?;
    let algo = String::from_utf8(algo_bytes.to_vec()).map_err(|_| err())?;
    let mask_bytes = bytes.get(1 + len..1 + len + 4).ok_or_else(err)?;
    let mask = u32::from_le_bytes(mask_bytes.try_into().unwrap());
    Ok((algo, mask))
}

fn run_predict(args: PredictArgs) -> OracleResult<()> {
    let platform = TargetPlatform::by_name(&args.platform)
        .ok_or_else(|| OracleError::MalformedLog(format!("unknown platform '{}'", args.platform)))?;
    info!("predicting PCR bank for platform {}", platform.name());

    let mask = parse_pcr_mask(&args.pcrs)?;
    let bank = predict_bank(&args.event_log, &args.algorithm, mask, args.new_root, &uname_machine())?;

    let file = std::fs::File::create(&args.output)?;
    bank.write_snapshot(file)?;
    info!("wrote predicted PCR snapshot to {}", args.output.display());
    Ok(())
}

fn run_seal(args: SealArgs) -> OracleResult<()> {
    let platform = TargetPlatform::by_name(&args.platform)
        .ok_or_else(|| OracleError::MalformedLog(format!("unknown platform '{}'", args.platform)))?;
    info!("sealing a secret for platform {}", platform.name());

    let mask = parse_pcr_mask(&args.pcrs)?;
    let bank = predict_bank(&args.event_log, &args.algorithm, mask, args.new_root, &uname_machine())?;
    let built = policy::build_policy(&[&bank], &args.algorithm)?;

    let secret = std::fs::read(&args.secret_file).map_err(|_| OracleError::MissingFile(args.secret_file.clone()))?;

    let mut transport = RecordPlaybackTransport::new(Env::from_process())?;
    let sealed = transport.seal(&built.policy_digest, &secret)?;
    let pubkey = transport.public_key()?;

    let key = TssPrivKey {
        empty_auth: true,
        policy: vec![TpmPolicy {
            command_code: policy::TPM2_CC_POLICY_PCR,
            command_policy: encode_policy_params(&args.algorithm, mask),
        }],
        secret: None,
        auth_policy: vec![],
        parent: 0x4000_0001,
        pubkey,
        privkey: sealed,
    };

    let stored = StoredKey::parse(&args.output, true, StoredKeyFormat::Pem)?;
    let der = keyfile::encode(&key);
    let bytes = match stored.format {
        StoredKeyFormat::Pem => keyfile::to_pem(&der).into_bytes(),
        StoredKeyFormat::Native => der,
    };
    std::fs::write(stored.as_path(), bytes)?;
    info!("wrote sealed key file to {}", stored.as_path().display());
    Ok(())
}

fn run_unseal(args: UnsealArgs) -> OracleResult<()> {
    let stored = StoredKey::parse(&args.key_file, true, StoredKeyFormat::Pem)?;
    let der = match stored.format {
        StoredKeyFormat::Pem => {
            let pem = std::fs::read_to_string(stored.as_path())
                .map_err(|_| OracleError::MissingFile(stored.as_path().to_path_buf()))?;
            keyfile::from_pem(&pem)?
        }
        StoredKeyFormat::Native => std::fs::read(stored.as_path())
            .map_err(|_| OracleError::MissingFile(stored.as_path().to_path_buf()))?,
    };
    let key = keyfile::decode(&der)?;

    let pcr_policy = key
        .policy
        .iter()
        .find(|p| p.command_code == policy::TPM2_CC_POLICY_PCR)
        .ok_or(OracleError::PolicyMismatch)?;
    let (policy_alg, mask) = decode_policy_params(&pcr_policy.command_policy)?;

    // The live TPM recomputes and checks the policy digest itself inside
    // `tpm2_policypcr`/`tpm2_unseal`, so there's no need to replay the event
    // log or rebuild a `PcrBank` here; the PCR selection spec is all
    // `unseal` needs to hand the TPM.
    let pcr_selection = pcr_selection_spec(&policy_alg, mask);
    let mut transport = RecordPlaybackTransport::new(Env::from_process())?;
    let secret = transport.unseal(&pcr_selection, &key.pubkey, &key.privkey)?;
    std::fs::write(&args.output, secret)?;
    info!("unsealed secret written to {}", args.output.display());
    Ok(())
}

fn run_show_log(args: ShowLogArgs) -> OracleResult<()> {
    let raw = std::fs::read(&args.event_log).map_err(|_| OracleError::MissingFile(args.event_log.clone()))?;
    let log = EventLog::parse(&raw)?;
    for (i, event) in log.events.iter().enumerate() {
        if args.pretty {
            println!("#{i} pcr={} type={:?}", event.pcr_index, event.event_type);
            for d in &event.digests {
                println!("    {}: {}", d.algo, d.digest);
            }
        } else {
            println!("{i}\t{}\t{:?}", event.pcr_index, event.event_type);
        }
    }
    Ok(())
}

fn run(cli: Cli) -> OracleResult<()> {
    match cli.command {
        Command::Predict(args) => run_predict(args),
        Command::Seal(args) => run_seal(args),
        Command::Unseal(args) => run_unseal(args),
        Command::ShowLog(args) => run_show_log(args),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}
