use oracle_api::error::{OracleError, OracleResult};

/// Bounded, cursor-tracked reader over a borrowed byte slice.
///
/// Every `get_*` call advances the read cursor and returns
/// `OracleError::Truncated` rather than panicking on a short read, since the
/// event log and device-path parsers both run on attacker-adjacent input
/// (a stale or corrupted firmware log) and must fail cleanly rather than
/// index out of bounds.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn require(&self, needed: usize) -> OracleResult<()> {
        if self.available() < needed {
            return Err(OracleError::Truncated {
                needed,
                available: self.available(),
            });
        }
        Ok(())
    }

    pub fn get(&mut self, n: usize) -> OracleResult<&'a [u8]> {
        self.require(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> OracleResult<u8> {
        Ok(self.get(1)?[0])
    }

    pub fn get_u16le(&mut self) -> OracleResult<u16> {
        let b = self.get(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32le(&mut self) -> OracleResult<u32> {
        let b = self.get(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64le(&mut self) -> OracleResult<u64> {
        let b = self.get(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Decodes `n_code_units` UTF-16LE code units (not bytes) into a UTF-8
    /// `String`.
    pub fn get_utf16le(&mut self, n_code_units: usize) -> OracleResult<String> {
        let bytes = self.get(n_code_units * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    pub fn skip(&mut self, n: usize) -> OracleResult<()> {
        self.require(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut r = Reader::new(&data);
        assert_eq!(r.get_u8().unwrap(), 0x01);
        assert_eq!(r.get_u16le().unwrap(), 0x0403);
        assert_eq!(r.get_u32le().unwrap(), 0x0807_0605);
    }

    #[test]
    fn short_read_is_truncated_error() {
        let data = [0u8; 2];
        let mut r = Reader::new(&data);
        assert!(r.get_u32le().is_err());
    }

    #[test]
    fn decodes_utf16le_without_terminator() {
        // "AB" in UTF-16LE
        let data = [0x41, 0x00, 0x42, 0x00];
        let mut r = Reader::new(&data);
        assert_eq!(r.get_utf16le(2).unwrap(), "AB");
    }

    #[test]
    fn eof_and_available_track_position() {
        let data = [0u8; 4];
        let mut r = Reader::new(&data);
        assert!(!r.eof());
        assert_eq!(r.available(), 4);
        r.skip(4).unwrap();
        assert!(r.eof());
        assert_eq!(r.available(), 0);
    }
}
