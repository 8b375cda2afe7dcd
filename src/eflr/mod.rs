//! Explicitly formatted logical records.
//!
//! An EFLR is a set: an optional type/name, a column template, and a
//! sequence of object rows.  Template columns carry defaults
//! (`count = 1`, `reprc = IDENT`, no value); each object row starts as a
//! clone of the attribute template and applies per-cell overrides from
//! its own descriptors.  `ABSATR` collapses a cell's value to absent.
//! Invariant columns are shared by every row and appended after the
//! per-object columns.

use log::warn;

use crate::error::{DlisError, Result};
use crate::types::{self, decode_array, Cursor, Obname, Reprc, Value};

// ── Component descriptors ─────────────────────────────────────────────────────

/// Role field of a component descriptor: the top three bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Absatr = 0,
    Attrib = 1,
    Invatr = 2,
    Object = 3,
    Reserved = 4,
    Rdset = 5,
    Rset = 6,
    Set = 7,
}

impl Role {
    pub fn from_descriptor(descriptor: u8) -> Role {
        match descriptor >> 5 {
            0 => Role::Absatr,
            1 => Role::Attrib,
            2 => Role::Invatr,
            3 => Role::Object,
            4 => Role::Reserved,
            5 => Role::Rdset,
            6 => Role::Rset,
            _ => Role::Set,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Role::Absatr => "absent attribute",
            Role::Attrib => "attribute",
            Role::Invatr => "invariant attribute",
            Role::Object => "object",
            Role::Reserved => "reserved",
            Role::Rdset => "redundant set",
            Role::Rset => "replacement set",
            Role::Set => "set",
        }
    }
}

// Role-specific format bits of the descriptor byte.
const SET_TYPE: u8 = 1 << 4;
const SET_NAME: u8 = 1 << 3;
const ATTR_LABEL: u8 = 1 << 4;
const ATTR_COUNT: u8 = 1 << 3;
const ATTR_REPRC: u8 = 1 << 2;
const ATTR_UNITS: u8 = 1 << 1;
const ATTR_VALUE: u8 = 1 << 0;

// ── Record model ──────────────────────────────────────────────────────────────

/// One attribute column, used both as a template entry and as an object
/// row cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub label: String,
    pub count: u32,
    pub reprc: Reprc,
    pub units: Option<String>,
    pub value: Option<Vec<Value>>,
}

impl Attribute {
    fn template_default() -> Self {
        Attribute {
            label: String::new(),
            count: 1,
            reprc: Reprc::Ident,
            units: None,
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EflrObject {
    pub name: Obname,
    pub row: Vec<Attribute>,
}

/// A decoded EFLR.  `objects` preserves first-seen order; a duplicate
/// OBNAME replaces the earlier row in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EflrRecord {
    pub set_type: Option<String>,
    pub set_name: Option<String>,
    pub template_attribute: Vec<Attribute>,
    pub template_invariant: Vec<Attribute>,
    pub objects: Vec<EflrObject>,
}

impl EflrRecord {
    /// Look up one object's row by name.
    pub fn object(&self, name: &Obname) -> Option<&[Attribute]> {
        self.objects
            .iter()
            .find(|o| &o.name == name)
            .map(|o| o.row.as_slice())
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

fn read_descriptor(cur: &mut Cursor) -> Result<u8> {
    match cur.peek() {
        Some(b) => {
            cur.skip(1);
            Ok(b)
        }
        None => Err(DlisError::Parse(format!(
            "truncated EFLR: component descriptor expected at offset {}",
            cur.position()
        ))),
    }
}

fn read_reprc(cur: &mut Cursor) -> Result<Reprc> {
    let pos = cur.position();
    let code = types::ushort(cur)?;
    Reprc::from_u8(code).ok_or_else(|| {
        DlisError::Parse(format!(
            "unknown representation code {code} at offset {pos}"
        ))
    })
}

/// Decode one materialised record as an EFLR.
pub fn parse_eflr(cat: &[u8]) -> Result<EflrRecord> {
    let mut cur = Cursor::new(cat);
    let mut record = EflrRecord::default();

    // Set header.
    let descriptor = read_descriptor(&mut cur)?;
    let role = Role::from_descriptor(descriptor);
    match role {
        Role::Set | Role::Rdset | Role::Rset => {}
        other => {
            return Err(DlisError::Parse(format!(
                "expected set, was {} ({descriptor:08b})",
                other.name()
            )))
        }
    }
    if descriptor & SET_TYPE != 0 {
        record.set_type = Some(types::ident(&mut cur)?);
    }
    if descriptor & SET_NAME != 0 {
        record.set_name = Some(types::ident(&mut cur)?);
    }

    // Template.  Ends at the first object descriptor, which is left for
    // the object loop to consume.
    while let Some(descriptor) = cur.peek() {
        let role = Role::from_descriptor(descriptor);
        match role {
            Role::Object => break,
            Role::Attrib | Role::Invatr => {}
            other => {
                return Err(DlisError::Parse(format!(
                    "template: expected attribute, got {} ({descriptor:08b})",
                    other.name()
                )))
            }
        }
        cur.skip(1);

        if descriptor & ATTR_LABEL == 0 {
            return Err(DlisError::Parse(
                "template: attribute without label".to_owned(),
            ));
        }

        let mut col = Attribute::template_default();
        col.label = types::ident(&mut cur)?;
        if descriptor & ATTR_COUNT != 0 {
            col.count = types::uvari(&mut cur)?;
        }
        if descriptor & ATTR_REPRC != 0 {
            col.reprc = read_reprc(&mut cur)?;
        }
        if descriptor & ATTR_UNITS != 0 {
            col.units = Some(types::units(&mut cur)?);
        }
        if descriptor & ATTR_VALUE != 0 {
            col.value = Some(decode_array(&mut cur, col.count, col.reprc)?);
        }

        if role == Role::Invatr {
            record.template_invariant.push(col);
        } else {
            record.template_attribute.push(col);
        }
    }

    // Objects.
    while !cur.is_empty() {
        let descriptor = read_descriptor(&mut cur)?;
        let role = Role::from_descriptor(descriptor);
        if role != Role::Object {
            return Err(DlisError::Parse(format!(
                "expected object, was {} ({descriptor:08b})",
                role.name()
            )));
        }
        let name = types::obname(&mut cur)?;

        let mut row = record.template_attribute.clone();
        for col in row.iter_mut() {
            // A truncated tail after the object name is tolerated: the
            // remaining cells keep their template state.
            let descriptor = match cur.peek() {
                Some(b) => b,
                None => break,
            };
            let role = Role::from_descriptor(descriptor);
            if role == Role::Object {
                break;
            }
            match role {
                Role::Attrib | Role::Absatr => {}
                other => {
                    return Err(DlisError::Parse(format!(
                        "expected attribute, found {} ({descriptor:08b})",
                        other.name()
                    )))
                }
            }
            cur.skip(1);

            if role == Role::Absatr {
                col.value = None;
                continue;
            }

            if descriptor & ATTR_LABEL != 0 {
                warn!("unexpected label in object attribute, possibly corrupted file");
                let _ = types::ident(&mut cur)?;
            }
            if descriptor & ATTR_COUNT != 0 {
                col.count = types::uvari(&mut cur)?;
            }
            if descriptor & ATTR_REPRC != 0 {
                col.reprc = read_reprc(&mut cur)?;
            }
            if descriptor & ATTR_UNITS != 0 {
                col.units = Some(types::units(&mut cur)?);
            }
            if descriptor & ATTR_VALUE != 0 {
                // Overrides from this descriptor are already applied, so
                // the value array decodes with the cell's current count
                // and representation code.
                col.value = Some(decode_array(&mut cur, col.count, col.reprc)?);
            }
        }

        row.extend(record.template_invariant.iter().cloned());

        match record.objects.iter_mut().find(|o| o.name == name) {
            Some(existing) => {
                warn!(
                    "duplicate object \"{}\" in set, keeping the last definition",
                    name.id
                );
                existing.row = row;
            }
            None => record.objects.push(EflrObject { name, row }),
        }
    }

    Ok(record)
}
