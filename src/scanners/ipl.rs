use std::collections::HashMap;

use oracle_api::error::OracleResult;
use oracle_api::primitives::DigestHex;
use sysdefs::eventtype::EventType;

use crate::digest;
use crate::eventlog::Event;

use super::{Outcome, ScanContext};

/// `EV_IPL`/`EV_IPL_PARTITION_DATA` events on the boot-loader PCRs (8, 9)
/// measure what the selected boot entry feeds the kernel: `EV_IPL` carries
/// the command line, `EV_IPL_PARTITION_DATA` the loader entry file itself.
/// Neither has a fixed wire format — sd-boot and grub measure free-form
/// strings — so a replacement is only possible once a boot entry has been
/// resolved by the caller.
pub fn scan(event: &Event, event_index: usize, ctx: &ScanContext) -> OracleResult<Outcome> {
    let Some(entry) = &ctx.boot_entry else {
        return Ok(Outcome::UseOriginalDigest);
    };

    let replacement: Vec<u8> = match event.event_type {
        EventType::Ipl => {
            let mut bytes = entry.options.clone().unwrap_or_default().into_bytes();
            bytes.push(0);
            bytes
        }
        EventType::IplPartitionData => std::fs::read(&entry.source_file)
            .map_err(|_| super::prediction_failed(event_index, format!("boot entry file '{}' is gone", entry.source_file.display())))?,
        _ => return Ok(Outcome::UseOriginalDigest),
    };

    let mut replacements = HashMap::new();
    for algo in &ctx.algorithms {
        let d: DigestHex = digest::digest(algo, &replacement)
            .map_err(|e| super::prediction_failed(event_index, e.to_string()))?;
        replacements.insert(algo.clone(), d);
    }
    Ok(Outcome::Replace(replacements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootentry::BootEntry;

    #[test]
    fn no_boot_entry_replays_original_digest() {
        let event = Event {
            pcr_index: 9,
            event_type: EventType::Ipl,
            digests: vec![],
            body: vec![],
        };
        let ctx = ScanContext::default();
        assert!(matches!(scan(&event, 0, &ctx).unwrap(), Outcome::UseOriginalDigest));
    }

    #[test]
    fn cmdline_event_hashes_entry_options() {
        let event = Event {
            pcr_index: 9,
            event_type: EventType::Ipl,
            digests: vec![],
            body: vec![],
        };
        let entry = BootEntry {
            options: Some("root=/dev/sda1 ro".to_string()),
            ..Default::default()
        };
        let ctx = ScanContext {
            boot_entry: Some(entry),
            algorithms: vec!["sha256".to_string()],
            ..Default::default()
        };
        let Outcome::Replace(digests) = scan(&event, 0, &ctx).unwrap() else {
            panic!("expected a replacement digest");
        };
        let expected = digest::digest("sha256", b"root=/dev/sda1 ro\0").unwrap();
        assert_eq!(digests.get("sha256").unwrap(), &expected);
    }
}
