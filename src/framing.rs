//! File framing: storage unit label, visible record labels, and logical
//! record segment headers.

use std::io::{self, Read};

use byteorder::{BigEndian, ByteOrder};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{DlisError, Result};

/// Size of the storage unit label at offset 0.
pub const SUL_SIZE: usize = 80;
/// Size of a visible record label.
pub const VRL_SIZE: usize = 4;
/// Size of a logical record segment header.
pub const LRSH_SIZE: usize = 4;

/// Read exactly `buf.len()` bytes, mapping a short read to [`DlisError::Eof`].
pub(crate) fn get_bytes<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DlisError::Eof),
        Err(e) => Err(DlisError::Io(e)),
    }
}

// ── Storage unit label ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageLayout {
    Record,
    Unknown,
}

/// The fixed 80-byte preamble of a storage unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageUnitLabel {
    pub sequence: u32,
    pub major: u8,
    pub minor: u8,
    pub layout: StorageLayout,
    /// Declared maximum visible record length; 0 means unlimited.
    pub maxlen: i64,
    pub id: String,
}

impl StorageUnitLabel {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; SUL_SIZE];
        get_bytes(reader, &mut buf)?;
        Self::parse(&buf)
    }

    pub fn parse(buf: &[u8; SUL_SIZE]) -> Result<Self> {
        let sequence = field(&buf[0..4], "sequence number")?
            .parse::<u32>()
            .map_err(|_| bad_field("sequence number"))?;

        // Version field is "V1.00"-shaped: marker, major digit, dot, minor.
        let version = &buf[4..9];
        if version[0] != b'V' || version[2] != b'.' {
            return Err(bad_field("version"));
        }
        let major = (version[1] as char)
            .to_digit(10)
            .ok_or_else(|| bad_field("version"))? as u8;
        let minor = field(&version[3..5], "version")?
            .parse::<u8>()
            .map_err(|_| bad_field("version"))?;

        let layout = match field(&buf[9..15], "structure")? {
            "RECORD" => StorageLayout::Record,
            _ => StorageLayout::Unknown,
        };

        let maxlen = field(&buf[15..20], "maximum record length")?
            .parse::<i64>()
            .map_err(|_| bad_field("maximum record length"))?;

        let id = field(&buf[20..80], "identifier")?.to_owned();

        Ok(Self {
            sequence,
            major,
            minor,
            layout,
            maxlen,
            id,
        })
    }

    pub fn version_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

fn field<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str> {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.is_ascii() => Ok(s.trim_matches(|c: char| c == ' ' || c == '\0')),
        _ => Err(bad_field(what)),
    }
}

fn bad_field(what: &str) -> DlisError {
    DlisError::Parse(format!("storage unit label: malformed {what}"))
}

// ── Visible record label ──────────────────────────────────────────────────────

/// Read a 4-byte visible record label and return the record length.
///
/// A version other than 1 is tolerated with a warning; parsing continues
/// on the assumption the framing is still V1-shaped.
pub fn read_vrl<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; VRL_SIZE];
    get_bytes(reader, &mut buf)?;

    let len = BigEndian::read_u16(&buf[0..2]);
    let version = buf[3];
    if version != 1 {
        warn!("visible record label version is {version}, expected 1");
    }
    if (len as usize) < VRL_SIZE {
        return Err(DlisError::Parse(format!(
            "visible record label: length {len} smaller than the label itself"
        )));
    }
    Ok(len)
}

// ── Logical record segment header ─────────────────────────────────────────────

/// The eight attribute flags of a logical record segment, unpacked from
/// the attribute byte MSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentAttributes {
    pub explicit_formatting: bool,
    pub has_predecessor: bool,
    pub has_successor: bool,
    pub is_encrypted: bool,
    pub has_encryption_packet: bool,
    pub has_checksum: bool,
    pub has_trailing_length: bool,
    pub has_padding: bool,
}

impl SegmentAttributes {
    pub fn from_byte(b: u8) -> Self {
        SegmentAttributes {
            explicit_formatting: b & 0x80 != 0,
            has_predecessor: b & 0x40 != 0,
            has_successor: b & 0x20 != 0,
            is_encrypted: b & 0x10 != 0,
            has_encryption_packet: b & 0x08 != 0,
            has_checksum: b & 0x04 != 0,
            has_trailing_length: b & 0x02 != 0,
            has_padding: b & 0x01 != 0,
        }
    }
}

/// One logical record segment header.  `ltype` names the record type; the
/// reader carries it through untouched for caller-side dispatch.
#[derive(Debug, Clone, Copy)]
pub struct SegmentHeader {
    pub len: u16,
    pub attrs: SegmentAttributes,
    pub ltype: u8,
}

impl SegmentHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; LRSH_SIZE];
        get_bytes(reader, &mut buf)?;

        let len = BigEndian::read_u16(&buf[0..2]);
        if (len as usize) < LRSH_SIZE {
            return Err(DlisError::Parse(format!(
                "logical record segment header: length {len} smaller than the header itself"
            )));
        }
        Ok(SegmentHeader {
            len,
            attrs: SegmentAttributes::from_byte(buf[2]),
            ltype: buf[3],
        })
    }

    /// Segment body length, header excluded.
    pub fn body_len(&self) -> usize {
        self.len as usize - LRSH_SIZE
    }
}
