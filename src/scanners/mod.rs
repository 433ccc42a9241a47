pub mod boot_app;
pub mod ipl;
pub mod variable;

use std::collections::HashMap;
use std::path::PathBuf;

use oracle_api::error::{OracleError, OracleResult};
use oracle_api::primitives::DigestHex;
use sysdefs::eventtype::EventType;

use crate::bootentry::BootEntry;
use crate::eventlog::Event;

/// What a scanner decided to do with one event.
pub enum Outcome {
    /// Re-extend with the digest the firmware already recorded.
    UseOriginalDigest,
    /// Extend with a freshly computed digest, one per requested algorithm.
    Replace(HashMap<String, DigestHex>),
}

/// Everything a scanner needs beyond the event itself: where the future
/// root filesystem lives, which EFI variables are changing, and which boot
/// entry will be selected next. All three are optional — a prediction run
/// that doesn't touch bootloader files or variables leaves them unset and
/// every event scans as `UseOriginalDigest`.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    pub new_root: Option<PathBuf>,
    pub variable_overlay: HashMap<(String, String), Vec<u8>>,
    pub boot_entry: Option<BootEntry>,
    pub algorithms: Vec<String>,
}

impl ScanContext {
    pub fn variable_replacement(&self, guid: &str, name: &str) -> Option<&[u8]> {
        self.variable_overlay
            .get(&(guid.to_ascii_lowercase(), name.to_string()))
            .map(|v| v.as_slice())
    }
}

/// Dispatches one event to the scanner appropriate for its type, returning
/// the digest(s) the predictor should extend the bank with.
pub fn scan(event: &Event, event_index: usize, ctx: &ScanContext) -> OracleResult<Outcome> {
    match event.event_type {
        EventType::EfiVariableDriverConfig
        | EventType::EfiVariableBoot
        | EventType::EfiVariableAuthority => variable::scan(event, event_index, ctx),

        EventType::EfiBootServicesApplication | EventType::EfiBootServicesDriver => {
            boot_app::scan(event, event_index, ctx)
        }

        EventType::Ipl | EventType::IplPartitionData => ipl::scan(event, event_index, ctx),

        // Separators, GPT events, action strings, platform/firmware blobs,
        // handoff tables, and anything not yet assigned its own scanner
        // replay verbatim: the predictor has no substitute value for them.
        _ => Ok(Outcome::UseOriginalDigest),
    }
}

pub(crate) fn prediction_failed(event_index: usize, reason: impl Into<String>) -> OracleError {
    OracleError::PredictionFailed {
        event_index,
        reason: reason.into(),
    }
}
