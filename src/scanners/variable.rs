use std::collections::HashMap;

use oracle_api::error::OracleResult;
use oracle_api::primitives::DigestHex;

use crate::buffer::Reader;
use crate::digest;
use crate::eventlog::Event;

use super::{Outcome, ScanContext};

/// `EV_EFI_VARIABLE_*` event body: `(VendorGuid: 16B, NameSize: u64,
/// DataSize: u64, Name: UTF-16LE[NameSize code units], Data: [DataSize])`.
struct VariableEvent {
    guid_bytes: [u8; 16],
    guid: String,
    name: String,
    name_utf16_bytes: Vec<u8>,
    data: Vec<u8>,
}

fn parse(body: &[u8]) -> OracleResult<VariableEvent> {
    let mut r = Reader::new(body);
    let guid_slice = r.get(16)?;
    let mut guid_bytes = [0u8; 16];
    guid_bytes.copy_from_slice(guid_slice);

    let name_size = r.get_u64le()? as usize;
    let data_size = r.get_u64le()? as usize;
    let name_utf16_bytes = r.get(name_size * 2)?.to_vec();
    let name = String::from_utf16_lossy(
        &name_utf16_bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect::<Vec<_>>(),
    );
    let data = r.get(data_size)?.to_vec();

    Ok(VariableEvent {
        guid_bytes,
        guid: guid_to_string(&guid_bytes),
        name,
        name_utf16_bytes,
        data,
    })
}

/// Formats a raw 16-byte `EFI_GUID` in its canonical mixed-endian string
/// form: the first three fields are little-endian, the last two are taken
/// as-is.
pub fn guid_to_string(bytes: &[u8; 16]) -> String {
    let data1 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let data2 = u16::from_le_bytes([bytes[4], bytes[5]]);
    let data3 = u16::from_le_bytes([bytes[6], bytes[7]]);
    format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        data1, data2, data3, bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}

/// Recomputes `H(GUID ‖ LE64(name_len) ‖ LE64(data_len) ‖ name_utf16 ‖
/// data)` for each algorithm the bank tracks.
pub fn variable_digest_input(
    guid_bytes: &[u8; 16],
    name_utf16_bytes: &[u8],
    data: &[u8],
) -> Vec<u8> {
    let name_units = (name_utf16_bytes.len() / 2) as u64;
    let mut input = Vec::with_capacity(16 + 16 + name_utf16_bytes.len() + data.len());
    input.extend_from_slice(guid_bytes);
    input.extend_from_slice(&name_units.to_le_bytes());
    input.extend_from_slice(&(data.len() as u64).to_le_bytes());
    input.extend_from_slice(name_utf16_bytes);
    input.extend_from_slice(data);
    input
}

pub fn scan(event: &Event, event_index: usize, ctx: &ScanContext) -> OracleResult<Outcome> {
    let parsed = parse(&event.body).map_err(|e| super::prediction_failed(event_index, e.to_string()))?;

    let Some(new_data) = ctx.variable_replacement(&parsed.guid, &parsed.name) else {
        return Ok(Outcome::UseOriginalDigest);
    };

    let input = variable_digest_input(&parsed.guid_bytes, &parsed.name_utf16_bytes, new_data);

    let mut replacements = HashMap::new();
    for algo in &ctx.algorithms {
        let d: DigestHex = digest::digest(algo, &input)
            .map_err(|e| super::prediction_failed(event_index, e.to_string()))?;
        replacements.insert(algo.clone(), d);
    }
    Ok(Outcome::Replace(replacements))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_boot_variable_digest_matches_pinned_fixture() {
        // GUID 8be4df61-93ca-11d2-aa0d-00e098032b8c
        let guid_bytes: [u8; 16] = [
            0x61, 0xdf, 0xe4, 0x8b, 0xca, 0x93, 0xd2, 0x11, 0xaa, 0x0d, 0x00, 0xe0, 0x98, 0x03,
            0x2b, 0x8c,
        ];
        assert_eq!(
            guid_to_string(&guid_bytes),
            "8be4df61-93ca-11d2-aa0d-00e098032b8c"
        );

        let name_utf16: Vec<u8> = "SecureBoot"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let data = [0x01u8];

        let input = variable_digest_input(&guid_bytes, &name_utf16, &data);
        let digest = digest::digest("sha256", &input).unwrap();

        assert_eq!(
            digest.as_str(),
            "ccfc4bb32888a345bc8aeadaba552b627d99348c767681ab3141f5b01e40a40e"
        );
    }

    #[test]
    fn unreplaced_variable_uses_original_digest() {
        let mut body = Vec::new();
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());

        let event = Event {
            pcr_index: 7,
            event_type: sysdefs::eventtype::EventType::EfiVariableBoot,
            digests: vec![],
            body,
        };
        let ctx = ScanContext::default();
        assert!(matches!(scan(&event, 0, &ctx).unwrap(), Outcome::UseOriginalDigest));
    }
}
