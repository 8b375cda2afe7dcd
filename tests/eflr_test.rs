use std::io::Write;

use dlis::types::{Obname, Reprc, Value};
use dlis::{parse_eflr, DlisError, DlisFile};
use tempfile::NamedTempFile;

// Descriptor bytes: role in the top three bits, format flags below.
const SET_TYPED: u8 = 0xF0; // SET, type present
const SET_TYPED_NAMED: u8 = 0xF8; // SET, type + name present
const RDSET_TYPED_NAMED: u8 = 0xB8;
const RSET_TYPED_NAMED: u8 = 0xD8;
const ATTRIB_LABEL: u8 = 0x30;
const ATTRIB_LABEL_VALUE: u8 = 0x31;
const ATTRIB_VALUE: u8 = 0x21;
const ATTRIB_UNITS: u8 = 0x22;
const ATTRIB_COUNT_REPRC_VALUE: u8 = 0x2D;
const INVATR_LABEL_VALUE: u8 = 0x51;
const OBJECT_NAMED: u8 = 0x70;
const ABSATR: u8 = 0x00;

fn ident(s: &str) -> Vec<u8> {
    let mut out = vec![s.len() as u8];
    out.extend_from_slice(s.as_bytes());
    out
}

fn obname_bytes(origin: u8, copy: u8, id: &str) -> Vec<u8> {
    let mut out = vec![origin, copy];
    out.extend(ident(id));
    out
}

fn obname(origin: u32, copy: u8, id: &str) -> Obname {
    Obname {
        origin,
        copy,
        id: id.to_owned(),
    }
}

#[test]
fn set_with_template_and_object() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("AXIS"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("LABEL"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "FOO"));
    payload.push(ATTRIB_VALUE);
    payload.extend(ident("BAR"));

    let rec = parse_eflr(&payload).unwrap();
    assert_eq!(rec.set_type.as_deref(), Some("AXIS"));
    assert_eq!(rec.set_name, None);

    assert_eq!(rec.template_attribute.len(), 1);
    let col = &rec.template_attribute[0];
    assert_eq!(col.label, "LABEL");
    assert_eq!(col.count, 1);
    assert_eq!(col.reprc, Reprc::Ident);
    assert_eq!(col.units, None);
    assert_eq!(col.value, None);

    assert_eq!(rec.objects.len(), 1);
    let obj = &rec.objects[0];
    assert_eq!(obj.name, obname(0, 0, "FOO"));
    assert_eq!(obj.row.len(), 1);
    assert_eq!(
        obj.row[0].value,
        Some(vec![Value::Ident("BAR".to_owned())])
    );
}

#[test]
fn set_name_and_redundant_replacement_roles() {
    for first in [SET_TYPED_NAMED, RDSET_TYPED_NAMED, RSET_TYPED_NAMED] {
        let mut payload = vec![first];
        payload.extend(ident("FRAME"));
        payload.extend(ident("MAIN"));
        payload.push(ATTRIB_LABEL);
        payload.extend(ident("A"));
        payload.push(OBJECT_NAMED);
        payload.extend(obname_bytes(1, 0, "X"));

        let rec = parse_eflr(&payload).unwrap();
        assert_eq!(rec.set_name.as_deref(), Some("MAIN"));
    }
}

#[test]
fn absent_attribute_overrides_template_value() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("AXIS"));
    payload.push(ATTRIB_LABEL_VALUE);
    payload.extend(ident("LABEL"));
    payload.extend(ident("DEF"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));
    payload.push(ABSATR);

    let rec = parse_eflr(&payload).unwrap();
    assert_eq!(
        rec.template_attribute[0].value,
        Some(vec![Value::Ident("DEF".to_owned())])
    );
    assert_eq!(rec.objects[0].row[0].value, None);
}

#[test]
fn count_and_reprc_overrides_apply_to_own_value() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("CHANNEL"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("DIMENSION"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));
    payload.push(ATTRIB_COUNT_REPRC_VALUE);
    payload.push(0x03); // count = 3
    payload.push(16); // reprc = UNORM
    payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);

    let rec = parse_eflr(&payload).unwrap();
    let cell = &rec.objects[0].row[0];
    assert_eq!(cell.count, 3);
    assert_eq!(cell.reprc, Reprc::Unorm);
    assert_eq!(
        cell.value,
        Some(vec![Value::Uint(1), Value::Uint(2), Value::Uint(3)])
    );
}

#[test]
fn units_override() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("CHANNEL"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("SPACING"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));
    payload.push(ATTRIB_UNITS);
    payload.extend(ident("m"));

    let rec = parse_eflr(&payload).unwrap();
    assert_eq!(rec.objects[0].row[0].units.as_deref(), Some("m"));
    assert_eq!(rec.template_attribute[0].units, None);
}

#[test]
fn invariant_columns_appended_to_every_row() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("LOG"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("A"));
    payload.push(INVATR_LABEL_VALUE);
    payload.extend(ident("I"));
    payload.extend(ident("INV"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "Y"));

    let rec = parse_eflr(&payload).unwrap();
    assert_eq!(rec.template_attribute.len(), 1);
    assert_eq!(rec.template_invariant.len(), 1);

    for obj in &rec.objects {
        assert_eq!(
            obj.row.len(),
            rec.template_attribute.len() + rec.template_invariant.len()
        );
        assert_eq!(obj.row[1].label, "I");
        assert_eq!(
            obj.row[1].value,
            Some(vec![Value::Ident("INV".to_owned())])
        );
    }
}

#[test]
fn truncated_object_tail_keeps_template_defaults() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("TOOL"));
    payload.push(ATTRIB_LABEL_VALUE);
    payload.extend(ident("A"));
    payload.extend(ident("DEF"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("B"));
    // The object ends right after its name.
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));

    let rec = parse_eflr(&payload).unwrap();
    let row = &rec.objects[0].row;
    assert_eq!(row.len(), 2);
    assert_eq!(row[0].value, Some(vec![Value::Ident("DEF".to_owned())]));
    assert_eq!(row[1].value, None);
}

#[test]
fn object_lookup_by_name() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("TOOL"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("A"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(2, 1, "PROBE"));

    let rec = parse_eflr(&payload).unwrap();
    assert!(rec.object(&obname(2, 1, "PROBE")).is_some());
    assert!(rec.object(&obname(2, 0, "PROBE")).is_none());
}

#[test]
fn duplicate_obname_keeps_last_definition() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("TOOL"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("A"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));
    payload.push(ATTRIB_VALUE);
    payload.extend(ident("ONE"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));
    payload.push(ATTRIB_VALUE);
    payload.extend(ident("TWO"));

    let rec = parse_eflr(&payload).unwrap();
    assert_eq!(rec.objects.len(), 1);
    assert_eq!(
        rec.objects[0].row[0].value,
        Some(vec![Value::Ident("TWO".to_owned())])
    );
}

#[test]
fn set_with_no_objects() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("PARAMETER"));
    payload.push(ATTRIB_LABEL_VALUE);
    payload.extend(ident("A"));
    payload.extend(ident("V"));

    let rec = parse_eflr(&payload).unwrap();
    assert_eq!(rec.template_attribute.len(), 1);
    assert!(rec.objects.is_empty());
}

// ── Failure paths ─────────────────────────────────────────────────────────────

#[test]
fn non_set_first_descriptor_fails() {
    let mut payload = vec![OBJECT_NAMED];
    payload.extend(obname_bytes(0, 0, "X"));
    assert!(matches!(
        parse_eflr(&payload),
        Err(DlisError::Parse(_))
    ));
}

#[test]
fn empty_record_fails() {
    assert!(matches!(parse_eflr(&[]), Err(DlisError::Parse(_))));
}

#[test]
fn template_attribute_without_label_fails() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("AXIS"));
    payload.push(ATTRIB_VALUE); // no label flag in a template item
    payload.extend(ident("V"));
    assert!(matches!(
        parse_eflr(&payload),
        Err(DlisError::Parse(_))
    ));
}

#[test]
fn unexpected_role_in_template_fails() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("AXIS"));
    payload.push(SET_TYPED); // a nested set is not a template component
    payload.extend(ident("NOPE"));
    assert!(matches!(
        parse_eflr(&payload),
        Err(DlisError::Parse(_))
    ));
}

#[test]
fn unexpected_role_in_object_row_fails() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("AXIS"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("A"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(0, 0, "X"));
    payload.push(INVATR_LABEL_VALUE); // invariant attributes live in the template only
    payload.extend(ident("I"));
    payload.extend(ident("V"));
    assert!(matches!(
        parse_eflr(&payload),
        Err(DlisError::Parse(_))
    ));
}

#[test]
fn truncated_template_value_fails() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("AXIS"));
    payload.push(ATTRIB_LABEL_VALUE);
    payload.extend(ident("A"));
    payload.extend_from_slice(&[0x05, b'x']); // IDENT claims 5 bytes, 1 present
    assert!(matches!(
        parse_eflr(&payload),
        Err(DlisError::Parse(_))
    ));
}

#[test]
fn unknown_representation_code_fails() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("AXIS"));
    payload.push(0x34); // label + reprc
    payload.extend(ident("A"));
    payload.push(99); // not a representation code
    assert!(matches!(
        parse_eflr(&payload),
        Err(DlisError::Parse(_))
    ));
}

// ── Through the file handle ───────────────────────────────────────────────────

#[test]
fn eflr_through_file() {
    let mut payload = vec![SET_TYPED];
    payload.extend(ident("EQUIPMENT"));
    payload.push(ATTRIB_LABEL);
    payload.extend(ident("STATUS"));
    payload.push(OBJECT_NAMED);
    payload.extend(obname_bytes(1, 0, "PAD"));
    payload.push(ATTRIB_COUNT_REPRC_VALUE);
    payload.push(0x01); // count = 1
    payload.push(26); // reprc = STATUS
    payload.push(0x01);

    let mut file = Vec::new();
    file.extend_from_slice(b"   1");
    file.extend_from_slice(b"V1.00");
    file.extend_from_slice(b"RECORD");
    file.extend_from_slice(b" 8192");
    let mut id = b"EFLR-TEST".to_vec();
    id.resize(60, b' ');
    file.extend_from_slice(&id);

    let mut segment = Vec::new();
    segment.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
    segment.push(0x80);
    segment.push(0x00);
    segment.extend_from_slice(&payload);

    file.extend_from_slice(&((segment.len() + 4) as u16).to_be_bytes());
    file.push(0xFF);
    file.push(0x01);
    file.extend_from_slice(&segment);

    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(&file).unwrap();
    tmp.flush().unwrap();

    let mut f = DlisFile::open(tmp.path()).unwrap();
    f.sul().unwrap();
    let (bm, _) = f.mark(0).unwrap();
    assert!(bm.is_explicit);

    let rec = f.eflr(&bm).unwrap();
    assert_eq!(rec.set_type.as_deref(), Some("EQUIPMENT"));
    assert_eq!(
        rec.objects[0].row[0].value,
        Some(vec![Value::Status(true)])
    );
}
