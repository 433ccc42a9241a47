use std::collections::HashMap;

use oracle_api::error::OracleResult;
use oracle_api::primitives::DigestHex;

use crate::authenticode;
use crate::buffer::Reader;
use crate::devpath::DevicePath;
use crate::eventlog::Event;

use super::{Outcome, ScanContext};

/// `EV_EFI_BOOT_SERVICES_APPLICATION`/`_DRIVER` event body:
/// `UEFI_IMAGE_LOAD_EVENT { ImageLocationInMemory: u64, ImageLengthInMemory:
/// u64, ImageLinkTimeAddress: u64, LengthOfDevicePath: u64, DevicePath: [u8;
/// LengthOfDevicePath] }`.
fn device_path(body: &[u8]) -> OracleResult<DevicePath> {
    let mut r = Reader::new(body);
    let _image_location = r.get_u64le()?;
    let _image_length = r.get_u64le()?;
    let _link_time_address = r.get_u64le()?;
    let path_len = r.get_u64le()? as usize;
    let path_bytes = r.get(path_len)?;
    DevicePath::parse(path_bytes)
}

pub fn scan(event: &Event, event_index: usize, ctx: &ScanContext) -> OracleResult<Outcome> {
    let Some(new_root) = &ctx.new_root else {
        return Ok(Outcome::UseOriginalDigest);
    };

    let path = device_path(&event.body).map_err(|e| super::prediction_failed(event_index, e.to_string()))?;
    let Some(file_path) = path.file_path() else {
        // No file-path item on this device path (e.g. a PXE or raw-disk
        // load): nothing under `new_root` corresponds to it.
        return Ok(Outcome::UseOriginalDigest);
    };

    let resolved = new_root.join(file_path.trim_start_matches('/'));
    let image = std::fs::read(&resolved)
        .map_err(|_| super::prediction_failed(event_index, format!("boot application '{}' not found under new root", resolved.display())))?;

    let mut replacements = HashMap::new();
    for algo in &ctx.algorithms {
        let d: DigestHex = authenticode::authenticode_digest(algo, &image)
            .map_err(|e| super::prediction_failed(event_index, e.to_string()))?;
        replacements.insert(algo.clone(), d);
    }
    Ok(Outcome::Replace(replacements))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_app_body(path_bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&(path_bytes.len() as u64).to_le_bytes());
        body.extend_from_slice(path_bytes);
        body
    }

    fn file_path_item() -> Vec<u8> {
        let name: Vec<u8> = "\\EFI\\BOOT\\BOOTX64.EFI\0"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let len = (4 + name.len()) as u16;
        let mut bytes = vec![0x04u8, 0x04];
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&[0x7f, 0xff, 0x04, 0x00]);
        bytes
    }

    #[test]
    fn no_new_root_replays_original_digest() {
        let event = Event {
            pcr_index: 4,
            event_type: sysdefs::eventtype::EventType::EfiBootServicesApplication,
            digests: vec![],
            body: boot_app_body(&file_path_item()),
        };
        let ctx = ScanContext::default();
        assert!(matches!(scan(&event, 0, &ctx).unwrap(), Outcome::UseOriginalDigest));
    }

    #[test]
    fn missing_file_under_new_root_fails_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let event = Event {
            pcr_index: 4,
            event_type: sysdefs::eventtype::EventType::EfiBootServicesApplication,
            digests: vec![],
            body: boot_app_body(&file_path_item()),
        };
        let ctx = ScanContext {
            new_root: Some(dir.path().to_path_buf()),
            algorithms: vec!["sha256".to_string()],
            ..Default::default()
        };
        assert!(scan(&event, 0, &ctx).is_err());
    }
}
