pub mod eflr;
pub mod error;
pub mod file;
pub mod framing;
pub mod types;

pub use eflr::{parse_eflr, Attribute, EflrObject, EflrRecord, Role};
pub use error::{DlisError, Result};
pub use file::{index_record, read_record, Bookmark, DlisFile};
pub use framing::{SegmentAttributes, SegmentHeader, StorageLayout, StorageUnitLabel};
pub use types::{Obname, Reprc, Value};
