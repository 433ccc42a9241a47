use oracle_api::error::{OracleError, OracleResult};
use oracle_api::primitives::DigestHex;
use sysdefs::eventtype::EventType;
use sysdefs::hashalg;

use crate::buffer::Reader;

const EV_NO_ACTION: u32 = 0x0000_0003;
const SPEC_ID_SIGNATURE: &[u8] = b"Spec ID Event03\0";

/// One algorithm's digest slice attached to a crypto-agile event.
#[derive(Debug, Clone)]
pub struct EventDigest {
    pub algo: String,
    pub digest: DigestHex,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub pcr_index: u32,
    pub event_type: EventType,
    pub digests: Vec<EventDigest>,
    pub body: Vec<u8>,
}

impl Event {
    pub fn digest_for(&self, algo: &str) -> Option<&DigestHex> {
        self.digests.iter().find(|d| d.algo == algo).map(|d| &d.digest)
    }
}

/// A parsed TCG crypto-agile event log: the spec-id header plus the
/// sequence of `TCG_PCR_EVENT2` records that follow it.
#[derive(Debug, Clone)]
pub struct EventLog {
    pub algorithms: Vec<String>,
    pub events: Vec<Event>,
}

impl EventLog {
    pub fn parse(data: &[u8]) -> OracleResult<Self> {
        let mut r = Reader::new(data);

        // The very first record is a legacy TCG_PCR_EVENT (SHA1-shaped)
        // carrying the EV_NO_ACTION spec-id event as its body.
        let _pcr_index = r.get_u32le()?;
        let event_type = r.get_u32le()?;
        if event_type != EV_NO_ACTION {
            return Err(OracleError::MalformedLog(
                "first event log record is not a spec-id (EV_NO_ACTION) event".into(),
            ));
        }
        let _legacy_digest = r.get(20)?;
        let event_size = r.get_u32le()? as usize;
        let spec_id_body = r.get(event_size)?;
        let algorithms = parse_spec_id_event(spec_id_body)?;

        let mut events = Vec::new();
        while !r.eof() {
            events.push(parse_event2(&mut r, &algorithms)?);
        }

        Ok(EventLog { algorithms, events })
    }
}

fn parse_spec_id_event(body: &[u8]) -> OracleResult<Vec<String>> {
    let mut r = Reader::new(body);
    let signature = r.get(16)?;
    if signature != SPEC_ID_SIGNATURE {
        return Err(OracleError::MalformedLog(
            "event log is not in crypto-agile (\"Spec ID Event03\") format".into(),
        ));
    }
    let _platform_class = r.get_u32le()?;
    let _spec_version_minor = r.get_u8()?;
    let _spec_version_major = r.get_u8()?;
    let _spec_errata = r.get_u8()?;
    let _uintn_size = r.get_u8()?;
    let number_of_algorithms = r.get_u32le()?;

    let mut algorithms = Vec::with_capacity(number_of_algorithms as usize);
    for _ in 0..number_of_algorithms {
        let alg_id = r.get_u16le()?;
        let _digest_size = r.get_u16le()?;
        let info = hashalg::digest_by_tpm_id(alg_id)
            .map_err(|e| OracleError::MalformedLog(e.to_string()))?;
        algorithms.push(info.name.to_string());
    }
    Ok(algorithms)
}

fn parse_event2(r: &mut Reader, algorithms: &[String]) -> OracleResult<Event> {
    let pcr_index = r.get_u32le()?;
    let event_type = EventType::from_raw(r.get_u32le()?);
    let digest_count = r.get_u32le()? as usize;

    if digest_count != algorithms.len() {
        return Err(OracleError::MalformedLog(format!(
            "event carries {digest_count} digests but header declared {} algorithms",
            algorithms.len()
        )));
    }

    let mut digests = Vec::with_capacity(digest_count);
    for _ in 0..digest_count {
        let alg_id = r.get_u16le()?;
        let info = hashalg::digest_by_tpm_id(alg_id)
            .map_err(|e| OracleError::MalformedLog(e.to_string()))?;
        let bytes = r.get(info.digest_size)?;
        digests.push(EventDigest {
            algo: info.name.to_string(),
            digest: DigestHex::from_bytes(bytes),
        });
    }

    let event_size = r.get_u32le()? as usize;
    let body = r.get(event_size)?.to_vec();

    Ok(Event {
        pcr_index,
        event_type,
        digests,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_id_event() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(SPEC_ID_SIGNATURE);
        body.extend_from_slice(&0u32.to_le_bytes()); // platform class
        body.push(0); // spec version minor
        body.push(2); // spec version major
        body.push(0); // errata
        body.push(4); // uintn size
        body.extend_from_slice(&1u32.to_le_bytes()); // number of algorithms
        body.extend_from_slice(&hashalg::TPM_ALG_SHA256.to_le_bytes());
        body.extend_from_slice(&32u16.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // vendor info size

        let mut record = Vec::new();
        record.extend_from_slice(&0u32.to_le_bytes()); // pcr index
        record.extend_from_slice(&EV_NO_ACTION.to_le_bytes());
        record.extend_from_slice(&[0u8; 20]); // legacy sha1 digest
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&body);
        record
    }

    fn append_event(log: &mut Vec<u8>, pcr_index: u32, event_type: u32, digest: &[u8], body: &[u8]) {
        log.extend_from_slice(&pcr_index.to_le_bytes());
        log.extend_from_slice(&event_type.to_le_bytes());
        log.extend_from_slice(&1u32.to_le_bytes()); // digest count
        log.extend_from_slice(&hashalg::TPM_ALG_SHA256.to_le_bytes());
        log.extend_from_slice(digest);
        log.extend_from_slice(&(body.len() as u32).to_le_bytes());
        log.extend_from_slice(body);
    }

    #[test]
    fn parses_header_and_single_event() {
        let mut log = spec_id_event();
        append_event(&mut log, 4, 0x8000_0003, &[0xAA; 32], b"hello");

        let parsed = EventLog::parse(&log).unwrap();
        assert_eq!(parsed.algorithms, vec!["sha256"]);
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].pcr_index, 4);
        assert_eq!(parsed.events[0].body, b"hello");
        assert_eq!(
            parsed.events[0].digest_for("sha256").unwrap().to_bytes(),
            vec![0xAAu8; 32]
        );
    }

    #[test]
    fn rejects_log_without_spec_id_header() {
        let mut log = Vec::new();
        append_event(&mut log, 0, 1, &[0u8; 32], b"");
        assert!(EventLog::parse(&log).is_err());
    }

    #[test]
    fn rejects_digest_count_mismatch() {
        let mut log = spec_id_event();
        // two digests where header declared one algorithm
        log.extend_from_slice(&0u32.to_le_bytes());
        log.extend_from_slice(&1u32.to_le_bytes());
        log.extend_from_slice(&2u32.to_le_bytes());
        assert!(EventLog::parse(&log).is_err());
    }
}
