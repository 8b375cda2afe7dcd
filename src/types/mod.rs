//! Representation-code primitive decoders.
//!
//! All decoders operate on a [`Cursor`] over one materialised logical
//! record.  A decoder either consumes exactly the bytes its code requires
//! or fails without advancing; callers never see a half-moved cursor.
//! Multi-byte integers and IEEE floats are big-endian throughout.

use byteorder::{BigEndian, ByteOrder};
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{DlisError, Result};

// ── Cursor ────────────────────────────────────────────────────────────────────

/// Bounds-checked read position over a record buffer.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DlisError::Parse(format!(
                "{}: truncated at offset {} ({} byte(s) needed, {} left)",
                what,
                self.pos,
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

// ── Representation codes ──────────────────────────────────────────────────────

/// RP66 V1 representation codes, appendix B numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reprc {
    Fshort = 1,
    Fsingl = 2,
    Fsing1 = 3,
    Fsing2 = 4,
    Isingl = 5,
    Vsingl = 6,
    Fdoubl = 7,
    Fdoub1 = 8,
    Fdoub2 = 9,
    Csingl = 10,
    Cdoubl = 11,
    Sshort = 12,
    Snorm = 13,
    Slong = 14,
    Ushort = 15,
    Unorm = 16,
    Ulong = 17,
    Uvari = 18,
    Ident = 19,
    Ascii = 20,
    Dtime = 21,
    Origin = 22,
    Obname = 23,
    Objref = 24,
    Attref = 25,
    Status = 26,
    Units = 27,
}

impl Reprc {
    pub fn from_u8(code: u8) -> Option<Reprc> {
        match code {
            1 => Some(Reprc::Fshort),
            2 => Some(Reprc::Fsingl),
            3 => Some(Reprc::Fsing1),
            4 => Some(Reprc::Fsing2),
            5 => Some(Reprc::Isingl),
            6 => Some(Reprc::Vsingl),
            7 => Some(Reprc::Fdoubl),
            8 => Some(Reprc::Fdoub1),
            9 => Some(Reprc::Fdoub2),
            10 => Some(Reprc::Csingl),
            11 => Some(Reprc::Cdoubl),
            12 => Some(Reprc::Sshort),
            13 => Some(Reprc::Snorm),
            14 => Some(Reprc::Slong),
            15 => Some(Reprc::Ushort),
            16 => Some(Reprc::Unorm),
            17 => Some(Reprc::Ulong),
            18 => Some(Reprc::Uvari),
            19 => Some(Reprc::Ident),
            20 => Some(Reprc::Ascii),
            21 => Some(Reprc::Dtime),
            22 => Some(Reprc::Origin),
            23 => Some(Reprc::Obname),
            24 => Some(Reprc::Objref),
            25 => Some(Reprc::Attref),
            26 => Some(Reprc::Status),
            27 => Some(Reprc::Units),
            _ => None,
        }
    }
}

// ── Value types ───────────────────────────────────────────────────────────────

/// Object name triple: origin, copy number, identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Obname {
    pub origin: u32,
    pub copy: u8,
    pub id: String,
}

/// Object reference: the referenced object's type plus its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objref {
    pub kind: String,
    pub name: Obname,
}

/// Attribute reference: an [`Objref`] narrowed to one attribute label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attref {
    pub kind: String,
    pub name: Obname,
    pub label: String,
}

/// Decoded DTIME fields.  `tz` is the raw zone nibble (0 = local standard,
/// 1 = local daylight savings, 2 = GMT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlisTime {
    pub year: u16,
    pub tz: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

impl DlisTime {
    /// Calendar view of the timestamp.  Returns `None` when the stored
    /// fields do not form a valid date (files in the wild do contain
    /// zeroed or nonsense timestamps).
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_milli_opt(
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
                self.millisecond as u32,
            )
    }
}

/// One decoded cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Single(f32),
    SingleBound { value: f32, bound: f32 },
    SingleRange { value: f32, lower: f32, upper: f32 },
    Double(f64),
    DoubleBound { value: f64, bound: f64 },
    DoubleRange { value: f64, lower: f64, upper: f64 },
    ComplexSingle { re: f32, im: f32 },
    ComplexDouble { re: f64, im: f64 },
    Int(i32),
    Uint(u32),
    Ident(String),
    Ascii(String),
    Time(DlisTime),
    Status(bool),
    Obname(Obname),
    Objref(Objref),
    Attref(Attref),
    Units(String),
}

impl Value {
    /// Decode one value of the given representation code.
    pub fn decode(cur: &mut Cursor, reprc: Reprc) -> Result<Value> {
        Ok(match reprc {
            Reprc::Fshort => Value::Single(fshort(cur)?),
            Reprc::Fsingl => Value::Single(fsingl(cur)?),
            Reprc::Fsing1 => {
                let (value, bound) = fsing1(cur)?;
                Value::SingleBound { value, bound }
            }
            Reprc::Fsing2 => {
                let (value, lower, upper) = fsing2(cur)?;
                Value::SingleRange { value, lower, upper }
            }
            Reprc::Isingl => Value::Single(isingl(cur)?),
            Reprc::Vsingl => Value::Single(vsingl(cur)?),
            Reprc::Fdoubl => Value::Double(fdoubl(cur)?),
            Reprc::Fdoub1 => {
                let (value, bound) = fdoub1(cur)?;
                Value::DoubleBound { value, bound }
            }
            Reprc::Fdoub2 => {
                let (value, lower, upper) = fdoub2(cur)?;
                Value::DoubleRange { value, lower, upper }
            }
            Reprc::Csingl => {
                let (re, im) = csingl(cur)?;
                Value::ComplexSingle { re, im }
            }
            Reprc::Cdoubl => {
                let (re, im) = cdoubl(cur)?;
                Value::ComplexDouble { re, im }
            }
            Reprc::Sshort => Value::Int(sshort(cur)? as i32),
            Reprc::Snorm => Value::Int(snorm(cur)? as i32),
            Reprc::Slong => Value::Int(slong(cur)?),
            Reprc::Ushort => Value::Uint(ushort(cur)? as u32),
            Reprc::Unorm => Value::Uint(unorm(cur)? as u32),
            Reprc::Ulong => Value::Uint(ulong(cur)?),
            Reprc::Uvari | Reprc::Origin => Value::Uint(uvari(cur)?),
            Reprc::Ident => Value::Ident(ident(cur)?),
            Reprc::Ascii => Value::Ascii(ascii(cur)?),
            Reprc::Dtime => Value::Time(dtime(cur)?),
            Reprc::Obname => Value::Obname(obname(cur)?),
            Reprc::Objref => Value::Objref(objref(cur)?),
            Reprc::Attref => Value::Attref(attref(cur)?),
            Reprc::Status => Value::Status(status(cur)?),
            Reprc::Units => Value::Units(units(cur)?),
        })
    }
}

/// Decode `count` consecutive values of one representation code.
pub fn decode_array(cur: &mut Cursor, count: u32, reprc: Reprc) -> Result<Vec<Value>> {
    // Cap the upfront reservation; count comes from the wire.
    let mut out = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        out.push(Value::decode(cur, reprc)?);
    }
    Ok(out)
}

// ── Integer codes ─────────────────────────────────────────────────────────────

pub fn sshort(cur: &mut Cursor) -> Result<i8> {
    Ok(cur.take(1, "SSHORT")?[0] as i8)
}

pub fn snorm(cur: &mut Cursor) -> Result<i16> {
    Ok(BigEndian::read_i16(cur.take(2, "SNORM")?))
}

pub fn slong(cur: &mut Cursor) -> Result<i32> {
    Ok(BigEndian::read_i32(cur.take(4, "SLONG")?))
}

pub fn ushort(cur: &mut Cursor) -> Result<u8> {
    Ok(cur.take(1, "USHORT")?[0])
}

pub fn unorm(cur: &mut Cursor) -> Result<u16> {
    Ok(BigEndian::read_u16(cur.take(2, "UNORM")?))
}

pub fn ulong(cur: &mut Cursor) -> Result<u32> {
    Ok(BigEndian::read_u32(cur.take(4, "ULONG")?))
}

/// Variable-width unsigned: the two high bits of the first byte select a
/// 1, 2, or 4 byte encoding carrying 7, 14, or 30 value bits.
pub fn uvari(cur: &mut Cursor) -> Result<u32> {
    let first = match cur.peek() {
        Some(b) => b,
        None => {
            return Err(DlisError::Parse(format!(
                "UVARI: truncated at offset {}",
                cur.position()
            )))
        }
    };

    if first & 0xC0 == 0xC0 {
        Ok(BigEndian::read_u32(cur.take(4, "UVARI")?) & 0x3FFF_FFFF)
    } else if first & 0x80 != 0 {
        Ok((BigEndian::read_u16(cur.take(2, "UVARI")?) & 0x3FFF) as u32)
    } else {
        Ok(cur.take(1, "UVARI")?[0] as u32)
    }
}

// ── Floating-point codes ──────────────────────────────────────────────────────

/// Legacy 16-bit float: upper 12 bits are a two's-complement mantissa,
/// lower 4 bits an unsigned exponent; value = (M / 2048) * 2^E.
pub fn fshort(cur: &mut Cursor) -> Result<f32> {
    let v = unorm(cur)?;
    let exp = (v & 0x000F) as i32;
    let mut frac = (v >> 4) as i32;
    if frac & 0x0800 != 0 {
        frac -= 0x1000;
    }
    Ok(frac as f32 / 2048.0 * (exp as f32).exp2())
}

pub fn fsingl(cur: &mut Cursor) -> Result<f32> {
    Ok(BigEndian::read_f32(cur.take(4, "FSINGL")?))
}

pub fn fsing1(cur: &mut Cursor) -> Result<(f32, f32)> {
    let b = cur.take(8, "FSING1")?;
    Ok((BigEndian::read_f32(&b[0..4]), BigEndian::read_f32(&b[4..8])))
}

pub fn fsing2(cur: &mut Cursor) -> Result<(f32, f32, f32)> {
    let b = cur.take(12, "FSING2")?;
    Ok((
        BigEndian::read_f32(&b[0..4]),
        BigEndian::read_f32(&b[4..8]),
        BigEndian::read_f32(&b[8..12]),
    ))
}

/// IBM hexadecimal single: sign, excess-64 base-16 exponent, 24-bit
/// fraction.
pub fn isingl(cur: &mut Cursor) -> Result<f32> {
    let v = BigEndian::read_u32(cur.take(4, "ISINGL")?);
    let sign = if v & 0x8000_0000 != 0 { -1.0f32 } else { 1.0 };
    let exp = ((v >> 24) & 0x7F) as i32 - 64;
    let frac = (v & 0x00FF_FFFF) as f32 / 16_777_216.0;
    Ok(sign * frac * 16f32.powi(exp))
}

/// VAX F-floating: 16-bit words in swapped byte order, excess-128
/// exponent, hidden leading 0.1 bit.  A zero exponent decodes to 0.0.
pub fn vsingl(cur: &mut Cursor) -> Result<f32> {
    let b = cur.take(4, "VSINGL")?;
    let v = u32::from(b[1]) << 24 | u32::from(b[0]) << 16 | u32::from(b[3]) << 8 | u32::from(b[2]);

    let exp = ((v >> 23) & 0xFF) as i32;
    if exp == 0 {
        return Ok(0.0);
    }
    let mantissa = 0.5 + (v & 0x007F_FFFF) as f32 / 16_777_216.0;
    let value = mantissa * ((exp - 128) as f32).exp2();
    Ok(if v & 0x8000_0000 != 0 { -value } else { value })
}

pub fn fdoubl(cur: &mut Cursor) -> Result<f64> {
    Ok(BigEndian::read_f64(cur.take(8, "FDOUBL")?))
}

pub fn fdoub1(cur: &mut Cursor) -> Result<(f64, f64)> {
    let b = cur.take(16, "FDOUB1")?;
    Ok((BigEndian::read_f64(&b[0..8]), BigEndian::read_f64(&b[8..16])))
}

pub fn fdoub2(cur: &mut Cursor) -> Result<(f64, f64, f64)> {
    let b = cur.take(24, "FDOUB2")?;
    Ok((
        BigEndian::read_f64(&b[0..8]),
        BigEndian::read_f64(&b[8..16]),
        BigEndian::read_f64(&b[16..24]),
    ))
}

pub fn csingl(cur: &mut Cursor) -> Result<(f32, f32)> {
    let b = cur.take(8, "CSINGL")?;
    Ok((BigEndian::read_f32(&b[0..4]), BigEndian::read_f32(&b[4..8])))
}

pub fn cdoubl(cur: &mut Cursor) -> Result<(f64, f64)> {
    let b = cur.take(16, "CDOUBL")?;
    Ok((BigEndian::read_f64(&b[0..8]), BigEndian::read_f64(&b[8..16])))
}

// ── Text and structured codes ─────────────────────────────────────────────────

/// Restricted-ASCII identifier: USHORT length prefix, then the payload.
pub fn ident(cur: &mut Cursor) -> Result<String> {
    let mut c = *cur;
    let len = ushort(&mut c)? as usize;
    let bytes = c.take(len, "IDENT")?;
    let s = match std::str::from_utf8(bytes) {
        Ok(s) if s.is_ascii() => s.to_owned(),
        _ => {
            return Err(DlisError::Parse(format!(
                "IDENT: non-ASCII payload at offset {}",
                cur.position()
            )))
        }
    };
    *cur = c;
    Ok(s)
}

/// Free-form text: UVARI length prefix, then the payload.
pub fn ascii(cur: &mut Cursor) -> Result<String> {
    let mut c = *cur;
    let len = uvari(&mut c)? as usize;
    let bytes = c.take(len, "ASCII")?;
    let s = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => {
            return Err(DlisError::Parse(format!(
                "ASCII: invalid text at offset {}",
                cur.position()
            )))
        }
    };
    *cur = c;
    Ok(s)
}

/// Units expression.  Framed exactly like IDENT.
pub fn units(cur: &mut Cursor) -> Result<String> {
    ident(cur)
}

pub fn dtime(cur: &mut Cursor) -> Result<DlisTime> {
    let b = cur.take(8, "DTIME")?;
    Ok(DlisTime {
        year: 1900 + b[0] as u16,
        tz: b[1] >> 4,
        month: b[1] & 0x0F,
        day: b[2],
        hour: b[3],
        minute: b[4],
        second: b[5],
        millisecond: BigEndian::read_u16(&b[6..8]),
    })
}

pub fn status(cur: &mut Cursor) -> Result<bool> {
    Ok(ushort(cur)? != 0)
}

pub fn obname(cur: &mut Cursor) -> Result<Obname> {
    let mut c = *cur;
    let origin = uvari(&mut c)?;
    let copy = ushort(&mut c)?;
    let id = ident(&mut c)?;
    *cur = c;
    Ok(Obname { origin, copy, id })
}

pub fn objref(cur: &mut Cursor) -> Result<Objref> {
    let mut c = *cur;
    let kind = ident(&mut c)?;
    let name = obname(&mut c)?;
    *cur = c;
    Ok(Objref { kind, name })
}

pub fn attref(cur: &mut Cursor) -> Result<Attref> {
    let mut c = *cur;
    let kind = ident(&mut c)?;
    let name = obname(&mut c)?;
    let label = ident(&mut c)?;
    *cur = c;
    Ok(Attref { kind, name, label })
}
