//! Record traversal engine — indexer, materialiser, and the owning
//! [`DlisFile`] handle.
//!
//! # Indexer
//! [`index_record`] walks segment headers from the current position,
//! skipping bodies, until it finds the final segment of one logical
//! record.  It yields a [`Bookmark`] for the record's first segment plus
//! the visible-record residual to feed into the next call, so repeated
//! invocation enumerates every logical record without materialising any
//! of them.
//!
//! # Materialiser
//! [`read_record`] reopens a bookmark and concatenates the record's
//! segment bodies into one flat buffer, stripping each segment's
//! trailing-length, checksum and padding suffixes.  Downstream decoders
//! never see segment or visible-record boundaries.
//!
//! # File handle
//! [`DlisFile`] owns the descriptor and pins the generic functions to
//! `std::fs::File`.  Operations on a closed handle fail with
//! [`DlisError::Closed`]; `close` is idempotent and dropping the handle
//! closes the descriptor.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::eflr::{parse_eflr, EflrRecord};
use crate::error::{DlisError, Result};
use crate::framing::{get_bytes, read_vrl, SegmentHeader, StorageUnitLabel, SUL_SIZE, VRL_SIZE};

// ── Bookmark ──────────────────────────────────────────────────────────────────

/// Stable reopen point for one logical record.
///
/// `residual` is the number of bytes left in the enclosing visible record
/// at `position`; 0 means the position is exactly at a visible record
/// label.  Bookmarks are plain values: they stay valid for the file's
/// lifetime and across close/reopen of the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub position: u64,
    pub residual: u32,
    pub is_explicit: bool,
}

// ── Indexer ───────────────────────────────────────────────────────────────────

/// Locate the next logical record without reading its payload.
///
/// Returns the record's bookmark and the visible-record residual after
/// its last segment, which is the `residual` for the next call.  O(1)
/// memory; one seek per segment.
pub fn index_record<R: Read + Seek>(reader: &mut R, residual: u32) -> Result<(Bookmark, u32)> {
    let mut bookmark = Bookmark {
        position: reader.stream_position()?,
        residual,
        is_explicit: false,
    };

    let mut remaining = residual;
    let mut first = true;
    loop {
        while remaining > 0 {
            let seg = SegmentHeader::read(reader)?;
            remaining = checked_residual(remaining, seg.len)?;

            if first {
                bookmark.is_explicit = seg.attrs.explicit_formatting;
                first = false;
            }

            reader.seek(SeekFrom::Current(seg.body_len() as i64))?;

            if !seg.attrs.has_successor {
                return Ok((bookmark, remaining));
            }
        }

        // Residual exhausted: the cursor sits exactly on a visible record
        // label.
        remaining = read_vrl(reader)? as u32 - VRL_SIZE as u32;
    }
}

fn checked_residual(remaining: u32, seg_len: u16) -> Result<u32> {
    remaining.checked_sub(seg_len as u32).ok_or_else(|| {
        DlisError::Parse(format!(
            "segment overrun: segment length {seg_len} exceeds visible record residual {remaining}"
        ))
    })
}

// ── Materialiser ──────────────────────────────────────────────────────────────

/// Materialise the logical record at `bookmark` as one contiguous buffer.
///
/// Per-segment suffixes are stripped in reverse on-wire order: trailing
/// length, then checksum, then padding (whose count byte counts itself).
/// Encrypted segment bodies are appended verbatim; the caller decides
/// what to do with ciphertext.
pub fn read_record<R: Read + Seek>(reader: &mut R, bookmark: &Bookmark) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(bookmark.position))?;

    let mut remaining = bookmark.residual;
    let mut cat: Vec<u8> = Vec::with_capacity(8192);

    loop {
        while remaining > 0 {
            let seg = SegmentHeader::read(reader)?;
            remaining = checked_residual(remaining, seg.len)?;

            let prev = cat.len();
            cat.resize(prev + seg.body_len(), 0);
            get_bytes(reader, &mut cat[prev..])?;

            let mut seg_bytes = seg.body_len();
            if seg.attrs.has_trailing_length {
                seg_bytes = strip_suffix(&mut cat, seg_bytes, 2, "trailing length")?;
            }
            if seg.attrs.has_checksum {
                seg_bytes = strip_suffix(&mut cat, seg_bytes, 2, "checksum")?;
            }
            if seg.attrs.has_padding {
                let pad = match cat.last() {
                    Some(&b) if seg_bytes > 0 => b as usize,
                    _ => {
                        return Err(DlisError::Parse(
                            "segment padding: missing pad count".to_owned(),
                        ))
                    }
                };
                if pad > seg_bytes {
                    return Err(DlisError::Parse(format!(
                        "segment padding: pad count {pad} exceeds segment body {seg_bytes}"
                    )));
                }
                cat.truncate(cat.len() - pad);
            }

            if !seg.attrs.has_successor {
                return Ok(cat);
            }
        }

        remaining = read_vrl(reader)? as u32 - VRL_SIZE as u32;
    }
}

fn strip_suffix(cat: &mut Vec<u8>, seg_bytes: usize, n: usize, what: &str) -> Result<usize> {
    if seg_bytes < n {
        return Err(DlisError::Parse(format!(
            "segment {what}: suffix longer than segment body"
        )));
    }
    cat.truncate(cat.len() - n);
    Ok(seg_bytes - n)
}

// ── File handle ───────────────────────────────────────────────────────────────

pub struct DlisFile {
    path:  PathBuf,
    inner: Option<File>,
}

impl DlisFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let inner = File::open(&path)?;
        Ok(Self {
            path,
            inner: Some(inner),
        })
    }

    /// Close the descriptor.  Safe to call more than once.
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&mut self) -> Result<&mut File> {
        self.inner.as_mut().ok_or(DlisError::Closed)
    }

    /// True when no further byte can be read.  Never moves the effective
    /// position.
    pub fn eof(&mut self) -> Result<bool> {
        let f = self.handle()?;
        let mut probe = [0u8; 1];
        loop {
            match f.read(&mut probe) {
                Ok(0) => return Ok(true),
                Ok(_) => {
                    f.seek(SeekFrom::Current(-1))?;
                    return Ok(false);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Decode the storage unit label at offset 0, leaving the position at
    /// the first visible record.
    pub fn sul(&mut self) -> Result<StorageUnitLabel> {
        let f = self.handle()?;
        f.seek(SeekFrom::Start(0))?;
        StorageUnitLabel::read(f)
    }

    /// Index the next logical record from the current position.
    pub fn mark(&mut self, residual: u32) -> Result<(Bookmark, u32)> {
        let f = self.handle()?;
        index_record(f, residual)
    }

    /// Materialise the record at `bookmark`.
    pub fn record(&mut self, bookmark: &Bookmark) -> Result<Vec<u8>> {
        let f = self.handle()?;
        read_record(f, bookmark)
    }

    /// Materialise and decode the record at `bookmark` as an EFLR.
    pub fn eflr(&mut self, bookmark: &Bookmark) -> Result<EflrRecord> {
        let cat = self.record(bookmark)?;
        parse_eflr(&cat)
    }

    /// Enumerate every logical record in the file.
    pub fn bookmarks(&mut self) -> Result<Vec<Bookmark>> {
        let f = self.handle()?;
        f.seek(SeekFrom::Start(SUL_SIZE as u64))?;

        let mut out = Vec::new();
        let mut residual = 0u32;
        while !self.eof()? {
            let (bookmark, next) = self.mark(residual)?;
            out.push(bookmark);
            residual = next;
        }
        Ok(out)
    }
}
