use base64::Engine;

use oracle_api::error::{OracleError, OracleResult};

/// The `TSS2 PRIVATE KEY` OID (`2.23.133.10.1.5`, TCG's "sealed data" object
/// type), DER-encoded once as a constant since this crate only ever writes
/// this one arc.
const SEALED_DATA_OID: &[u8] = &[0x06, 0x06, 0x67, 0x81, 0x05, 0x0a, 0x01, 0x05];

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_SEQUENCE: u8 = 0x30;

const PEM_GUARD_BEGIN: &str = "-----BEGIN TSS2 PRIVATE KEY-----";
const PEM_GUARD_END: &str = "-----END TSS2 PRIVATE KEY-----";

/// `TPMPolicy ::= SEQUENCE { commandCode [0] EXPLICIT INTEGER, commandPolicy
/// [1] EXPLICIT OCTET STRING }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmPolicy {
    pub command_code: u32,
    pub command_policy: Vec<u8>,
}

/// `TPMAuthPolicy ::= SEQUENCE { name [0] EXPLICIT UTF8String OPTIONAL,
/// policy [1] EXPLICIT SEQUENCE OF TPMPolicy }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmAuthPolicy {
    pub name: Option<String>,
    pub policy: Vec<TpmPolicy>,
}

/// The `TSSPRIVKEY` structure this crate's sealed key files carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TssPrivKey {
    pub empty_auth: bool,
    pub policy: Vec<TpmPolicy>,
    pub secret: Option<Vec<u8>>,
    pub auth_policy: Vec<TpmAuthPolicy>,
    pub parent: u32,
    pub pubkey: Vec<u8>,
    pub privkey: Vec<u8>,
}

// --- DER TLV encoding -------------------------------------------------

fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let mut bytes = Vec::new();
        let mut n = len;
        while n > 0 {
            bytes.push((n & 0xff) as u8);
            n >>= 8;
        }
        bytes.reverse();
        let mut out = vec![0x80 | bytes.len() as u8];
        out.extend(bytes);
        out
    }
}

fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

fn encode_integer(n: u64) -> Vec<u8> {
    let mut bytes = n.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0 && bytes[1] & 0x80 == 0 {
        bytes.remove(0);
    }
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    encode_tlv(TAG_INTEGER, &bytes)
}

fn encode_boolean(b: bool) -> Vec<u8> {
    encode_tlv(TAG_BOOLEAN, &[if b { 0xff } else { 0x00 }])
}

fn encode_octet_string(data: &[u8]) -> Vec<u8> {
    encode_tlv(TAG_OCTET_STRING, data)
}

fn encode_utf8_string(s: &str) -> Vec<u8> {
    encode_tlv(TAG_UTF8_STRING, s.as_bytes())
}

fn encode_sequence(items: &[Vec<u8>]) -> Vec<u8> {
    let content: Vec<u8> = items.iter().flatten().copied().collect();
    encode_tlv(TAG_SEQUENCE, &content)
}

/// Wraps `inner` (an already-encoded TLV) in an explicit context tag `[n]`.
fn encode_explicit(n: u8, inner: &[u8]) -> Vec<u8> {
    encode_tlv(0xa0 | n, inner)
}

fn encode_tpm_policy(policy: &TpmPolicy) -> Vec<u8> {
    encode_sequence(&[
        encode_explicit(0, &encode_integer(policy.command_code as u64)),
        encode_explicit(1, &encode_octet_string(&policy.command_policy)),
    ])
}

fn encode_tpm_auth_policy(auth: &TpmAuthPolicy) -> Vec<u8> {
    let mut fields = Vec::new();
    if let Some(name) = &auth.name {
        fields.push(encode_explicit(0, &encode_utf8_string(name)));
    }
    let policy_seq: Vec<Vec<u8>> = auth.policy.iter().map(encode_tpm_policy).collect();
    fields.push(encode_explicit(1, &encode_sequence(&policy_seq)));
    encode_sequence(&fields)
}

/// Serializes a [`TssPrivKey`] into the DER bytes of its `TSSPRIVKEY`
/// `SEQUENCE`.
pub fn encode(key: &TssPrivKey) -> Vec<u8> {
    let mut fields = vec![SEALED_DATA_OID.to_vec()];

    fields.push(encode_explicit(0, &encode_boolean(key.empty_auth)));

    if !key.policy.is_empty() {
        let policies: Vec<Vec<u8>> = key.policy.iter().map(encode_tpm_policy).collect();
        fields.push(encode_explicit(1, &encode_sequence(&policies)));
    }
    if let Some(secret) = &key.secret {
        fields.push(encode_explicit(2, &encode_octet_string(secret)));
    }
    if !key.auth_policy.is_empty() {
        let auths: Vec<Vec<u8>> = key.auth_policy.iter().map(encode_tpm_auth_policy).collect();
        fields.push(encode_explicit(3, &encode_sequence(&auths)));
    }

    fields.push(encode_integer(key.parent as u64));
    fields.push(encode_octet_string(&key.pubkey));
    fields.push(encode_octet_string(&key.privkey));

    encode_sequence(&fields)
}

/// Wraps DER bytes in 64-column PEM armor under the `TSS2 PRIVATE KEY`
/// guard.
pub fn to_pem(der: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = String::new();
    out.push_str(PEM_GUARD_BEGIN);
    out.push('\n');
    for line in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(line).unwrap());
        out.push('\n');
    }
    out.push_str(PEM_GUARD_END);
    out.push('\n');
    out
}

pub fn from_pem(pem: &str) -> OracleResult<Vec<u8>> {
    let body: String = pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| OracleError::MalformedLog(format!("invalid PEM body: {e}")))
}

// --- DER TLV decoding ---------------------------------------------------

struct Der<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Der<'a> {
    fn new(data: &'a [u8]) -> Self {
        Der { data, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_tlv(&mut self) -> OracleResult<(u8, &'a [u8])> {
        let err = || OracleError::MalformedLog("truncated DER TLV".into());
        let tag = *self.data.get(self.pos).ok_or_else(err)?;
        self.pos += 1;
        let first_len = *self.data.get(self.pos).ok_or_else(err)?;
        self.pos += 1;
        let len = if first_len & 0x80 == 0 {
            first_len as usize
        } else {
            let n = (first_len & 0x7f) as usize;
            let bytes = self.data.get(self.pos..self.pos + n).ok_or_else(err)?;
            self.pos += n;
            bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
        };
        let content = self.data.get(self.pos..self.pos + len).ok_or_else(err)?;
        self.pos += len;
        Ok((tag, content))
    }
}

fn decode_integer(content: &[u8]) -> u64 {
    content.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn decode_boolean(content: &[u8]) -> bool {
    content.first().copied().unwrap_or(0) != 0
}

fn decode_tpm_policy(content: &[u8]) -> OracleResult<TpmPolicy> {
    let mut der = Der::new(content);
    let (_, command_code_explicit) = der.read_tlv()?;
    let (_, command_policy_explicit) = der.read_tlv()?;

    let mut cc_der = Der::new(command_code_explicit);
    let (_, cc_bytes) = cc_der.read_tlv()?;
    let mut cp_der = Der::new(command_policy_explicit);
    let (_, cp_bytes) = cp_der.read_tlv()?;

    Ok(TpmPolicy {
        command_code: decode_integer(cc_bytes) as u32,
        command_policy: cp_bytes.to_vec(),
    })
}

fn decode_tpm_policy_sequence(content: &[u8]) -> OracleResult<Vec<TpmPolicy>> {
    let mut der = Der::new(content);
    let mut out = Vec::new();
    while !der.eof() {
        let (_, seq_content) = der.read_tlv()?;
        out.push(decode_tpm_policy(seq_content)?);
    }
    Ok(out)
}

fn decode_tpm_auth_policy(content: &[u8]) -> OracleResult<TpmAuthPolicy> {
    let mut der = Der::new(content);
    let (first_tag, first_content) = der.read_tlv()?;

    let (name, policy_content) = if first_tag == 0xa0 {
        let mut name_der = Der::new(first_content);
        let (_, name_bytes) = name_der.read_tlv()?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|e| OracleError::MalformedLog(format!("invalid UTF8String: {e}")))?;
        let (_, policy_explicit) = der.read_tlv()?;
        (Some(name), policy_explicit)
    } else {
        (None, first_content)
    };

    let mut policy_der = Der::new(policy_content);
    let (_, policy_seq) = policy_der.read_tlv()?;
    Ok(TpmAuthPolicy {
        name,
        policy: decode_tpm_policy_sequence(policy_seq)?,
    })
}

/// Parses the DER bytes of a `TSSPRIVKEY` `SEQUENCE`, the inverse of
/// [`encode`].
pub fn decode(der: &[u8]) -> OracleResult<TssPrivKey> {
    let mut top = Der::new(der);
    let (tag, seq_content) = top.read_tlv()?;
    if tag != TAG_SEQUENCE {
        return Err(OracleError::MalformedLog("TSSPRIVKEY is not a SEQUENCE".into()));
    }

    let mut der = Der::new(seq_content);

    let (oid_tag, _) = der.read_tlv()?;
    if oid_tag != TAG_OBJECT_IDENTIFIER {
        return Err(OracleError::MalformedLog("TSSPRIVKEY missing type OID".into()));
    }

    let mut empty_auth = false;
    let mut policy = Vec::new();
    let mut secret = None;
    let mut auth_policy = Vec::new();

    // Walk the optional [0]..[3] context-tagged fields, then the three
    // mandatory trailing fields (parent, pubkey, privkey).
    let mut pending: Option<(u8, &[u8])> = None;
    loop {
        let (tag, content) = match pending.take() {
            Some(t) => t,
            None => {
                if der.eof() {
                    return Err(OracleError::MalformedLog("TSSPRIVKEY missing parent handle".into()));
                }
                der.read_tlv()?
            }
        };

        match tag {
            0xa0 => {
                let mut inner = Der::new(content);
                let (_, b) = inner.read_tlv()?;
                empty_auth = decode_boolean(b);
            }
            0xa1 => {
                let mut inner = Der::new(content);
                let (_, seq) = inner.read_tlv()?;
                policy = decode_tpm_policy_sequence(seq)?;
            }
            0xa2 => {
                let mut inner = Der::new(content);
                let (_, s) = inner.read_tlv()?;
                secret = Some(s.to_vec());
            }
            0xa3 => {
                let mut inner = Der::new(content);
                let (_, seq) = inner.read_tlv()?;
                let mut seq_der = Der::new(seq);
                while !seq_der.eof() {
                    let (_, one) = seq_der.read_tlv()?;
                    auth_policy.push(decode_tpm_auth_policy(one)?);
                }
            }
            TAG_INTEGER => {
                let parent = decode_integer(content) as u32;
                let (_, pubkey_tlv) = der.read_tlv()?;
                let (_, privkey_tlv) = der.read_tlv()?;
                return Ok(TssPrivKey {
                    empty_auth,
                    policy,
                    secret,
                    auth_policy,
                    parent,
                    pubkey: pubkey_tlv.to_vec(),
                    privkey: privkey_tlv.to_vec(),
                });
            }
            other => {
                return Err(OracleError::MalformedLog(format!(
                    "unexpected TSSPRIVKEY field tag {other:#x}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> TssPrivKey {
        TssPrivKey {
            empty_auth: true,
            policy: vec![TpmPolicy {
                command_code: 0x0000_017F,
                command_policy: vec![0xAB; 32],
            }],
            secret: None,
            auth_policy: vec![],
            parent: 0x4000_0001,
            pubkey: (0..=255u16).map(|b| b as u8).collect(),
            privkey: (0..128u8).collect(),
        }
    }

    #[test]
    fn round_trips_field_by_field() {
        let key = sample_key();
        let der = encode(&key);
        let decoded = decode(&der).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn round_trips_through_pem_armor() {
        let key = sample_key();
        let der = encode(&key);
        let pem = to_pem(&der);
        assert!(pem.starts_with(PEM_GUARD_BEGIN));
        let recovered_der = from_pem(&pem).unwrap();
        assert_eq!(recovered_der, der);
        assert_eq!(decode(&recovered_der).unwrap(), key);
    }

    #[test]
    fn round_trips_with_auth_policy_and_secret() {
        let mut key = sample_key();
        key.secret = Some(vec![0x42; 16]);
        key.auth_policy = vec![TpmAuthPolicy {
            name: Some("systemd".to_string()),
            policy: vec![
                TpmPolicy {
                    command_code: 0x0000_017F,
                    command_policy: vec![0x01; 32],
                },
                TpmPolicy {
                    command_code: 0x0000_016A,
                    command_policy: vec![0x02; 32],
                },
            ],
        }];

        let der = encode(&key);
        let decoded = decode(&der).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn rejects_truncated_der() {
        assert!(decode(&[0x30, 0x10, 0x06]).is_err());
    }
}
