//! A length-delimited, tag-numbered binary framing primitive.
//!
//! Every on-disk entity (keys, transactions, pools, extensions — see
//! spec.md §4.8) is written as a sequence of tagged fields:
//!
//! ```text
//! u16 tag (high bit = mandatory flag) | u32 length (LE) | <length> bytes
//! ```
//!
//! Unknown tags are skipped on read unless their mandatory bit is set, in
//! which case the caller decides (via [`WalletConfig::require_mandatory_extensions`]
//! equivalent) whether to fail the load. This gives forward/backward
//! compatibility without pulling in a full protobuf toolchain: old readers
//! skip fields they don't understand, new fields can demand to be
//! understood.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{Error, Result};

const MANDATORY_BIT: u16 = 0x8000;
const TAG_MASK: u16 = 0x7FFF;

/// Appends tagged fields to an in-memory buffer.
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Writes one field. `tag` must fit in 15 bits (0..=0x7FFF).
    pub fn write_field(&mut self, tag: u16, mandatory: bool, bytes: &[u8]) {
        debug_assert!(tag & MANDATORY_BIT == 0, "tag must fit in 15 bits");
        let encoded_tag = if mandatory { tag | MANDATORY_BIT } else { tag };
        self.buf.write_u16::<LittleEndian>(encoded_tag).expect("write to Vec never fails");
        self.buf.write_u32::<LittleEndian>(bytes.len() as u32).expect("write to Vec never fails");
        self.buf.write_all(bytes).expect("write to Vec never fails");
    }

    pub fn write_u64(&mut self, tag: u16, mandatory: bool, value: u64) {
        self.write_field(tag, mandatory, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, tag: u16, mandatory: bool, value: u32) {
        self.write_field(tag, mandatory, &value.to_le_bytes());
    }

    pub fn write_str(&mut self, tag: u16, mandatory: bool, value: &str) {
        self.write_field(tag, mandatory, value.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// One decoded field.
pub struct Field {
    pub tag: u16,
    pub mandatory: bool,
    pub bytes: Vec<u8>,
}

/// Reads tagged fields back out of a buffer written by [`TlvWriter`].
pub struct TlvReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(data) }
    }

    /// Reads the next field, or `None` at end of buffer.
    pub fn next_field(&mut self) -> Result<Option<Field>> {
        let raw_tag = match self.cursor.read_u16::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::Other(e.to_string())),
        };
        let len = self
            .cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::Other(format!("truncated length: {e}")))? as usize;
        let mut bytes = vec![0u8; len];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|e| Error::Other(format!("truncated field body: {e}")))?;
        Ok(Some(Field { tag: raw_tag & TAG_MASK, mandatory: raw_tag & MANDATORY_BIT != 0, bytes }))
    }

    /// Reads every remaining field, failing if any unrecognised mandatory
    /// field is encountered (identified by its tag not being in `known`)
    /// and `require_mandatory` is true.
    pub fn read_all(&mut self, known: &[u16], require_mandatory: bool) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        while let Some(field) = self.next_field()? {
            if field.mandatory && require_mandatory && !known.contains(&field.tag) {
                return Err(Error::Other(format!(
                    "unknown mandatory extension field, tag {}",
                    field.tag
                )));
            }
            fields.push(field);
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_fields() {
        let mut w = TlvWriter::new();
        w.write_u64(1, true, 42);
        w.write_str(2, false, "hello");
        let bytes = w.into_bytes();

        let mut r = TlvReader::new(&bytes);
        let f1 = r.next_field().unwrap().unwrap();
        assert_eq!(f1.tag, 1);
        assert!(f1.mandatory);
        assert_eq!(u64::from_le_bytes(f1.bytes.try_into().unwrap()), 42);

        let f2 = r.next_field().unwrap().unwrap();
        assert_eq!(f2.tag, 2);
        assert!(!f2.mandatory);
        assert_eq!(String::from_utf8(f2.bytes).unwrap(), "hello");

        assert!(r.next_field().unwrap().is_none());
    }

    #[test]
    fn unknown_mandatory_field_fails_when_required() {
        let mut w = TlvWriter::new();
        w.write_field(99, true, b"future feature");
        let bytes = w.into_bytes();
        let mut r = TlvReader::new(&bytes);
        assert!(r.read_all(&[1, 2], true).is_err());

        let mut r2 = TlvReader::new(&bytes);
        assert!(r2.read_all(&[1, 2], false).is_ok());
    }
}
