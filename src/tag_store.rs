//! # Spool Document Storage on NTAG Pages
//!
//! Reads and writes the spool document as JSON text inside the NDEF Text record
//! at the start of tag user memory.
//!
//! ## Read path
//! Pages are fetched one at a time from `start_page`. After every page the TLV
//! area read so far is re-scanned, and reading stops as soon as it holds a
//! complete NDEF TLV or a terminator TLV. A `0xFE` that happens to sit inside a
//! length field or the JSON itself does not end the read early.
//!
//! ## Outcomes
//! - `Ok(Some(payload))`: a Text record holding a JSON object
//! - `Ok(None)`: blank or never-programmed tag, or a record that is not Text
//! - `Err(StoreError::Parse)`: a Text record whose JSON is damaged, typically
//!   after an interrupted multi-page write
//! - `Err(StoreError::ReadError)`: a page read failed before anything usable
//!   was decoded
//!
//! ## Write path
//! Writes are page-by-page with no rollback. A failure part way through leaves
//! earlier pages holding new bytes and later pages holding old ones; the next
//! read reports that as `Parse`.

use crate::ndef::{self, CodecError, Scan};
use crate::{Uid, MAX_PAGE, PAGE_SIZE};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a reader/writer collaborator for one transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PageIoError(pub String);

/// Page-level access to the tag currently in the field.
pub trait PageIo {
    fn read_page(&mut self, page: u16) -> Result<[u8; PAGE_SIZE], PageIoError>;
    fn write_page(&mut self, page: u16, data: &[u8; PAGE_SIZE]) -> Result<(), PageIoError>;
}

/// A transceiver that can also look for a tag in its field.
pub trait TagReader: PageIo {
    /// Return the UID of a tag in range, waiting at most `timeout`.
    fn scan_for_tag(&mut self, timeout: Duration) -> Option<Uid>;
}

/// Errors from reading or writing the spool document.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A Text record was found but its contents are not a JSON object
    #[error("tag document is corrupt: {source} (text starts {snippet:?})")]
    Parse {
        source: serde_json::Error,
        snippet: String,
    },

    #[error("could not serialize document: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Encoded document does not fit between the start page and `MAX_PAGE`
    #[error("document needs {needed} pages but only {available} are writable")]
    CapacityExceeded { needed: usize, available: usize },

    #[error("failed to read page {page}: {source}")]
    ReadError { page: u16, source: PageIoError },

    #[error("failed to write page {page}: {source}")]
    WriteError { page: u16, source: PageIoError },
}

/// The JSON mapping stored on a spool tag.
///
/// Keys on the tag are short (`min_d`, `grams_rem`, ...) to save pages. Every
/// field is optional here; [`crate::spool::normalise`] decides what is required.
/// Keys this crate does not know about are kept in `extra` and written back.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TagPayload {
    #[serde(
        rename = "ver",
        default,
        deserialize_with = "lenient_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub material_type: Option<String>,
    #[serde(rename = "fil_d", default, skip_serializing_if = "Option::is_none")]
    pub filament_diameter: Option<f64>,
    #[serde(rename = "min_d", default, skip_serializing_if = "Option::is_none")]
    pub min_diameter: Option<f64>,
    #[serde(rename = "max_d", default, skip_serializing_if = "Option::is_none")]
    pub max_diameter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grams_full: Option<f64>,
    #[serde(rename = "grams_rem", default, skip_serializing_if = "Option::is_none")]
    pub grams_remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meters_full: Option<f64>,
    #[serde(rename = "meters_rem", default, skip_serializing_if = "Option::is_none")]
    pub meters_remaining: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Accept `1`, `1.0` or anything else for `ver`; values that are not a whole
/// number in `u32` range read as absent.
fn lenient_version<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let Some(serde_json::Value::Number(n)) = Option::<serde_json::Value>::deserialize(deserializer)?
    else {
        return Ok(None);
    };
    Ok(n.as_u64()
        .or_else(|| {
            n.as_f64()
                .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= u32::MAX as f64)
                .map(|v| v as u64)
        })
        .and_then(|v| u32::try_from(v).ok()))
}

/// Language code written into new Text records.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Read the spool document from the tag.
///
/// At most `max_pages` pages are read, never past [`MAX_PAGE`].
pub fn read_document<T: PageIo + ?Sized>(
    tag: &mut T,
    start_page: u16,
    max_pages: u16,
) -> Result<Option<TagPayload>, StoreError> {
    if max_pages == 0 || start_page > MAX_PAGE {
        return Ok(None);
    }
    let last_page = MAX_PAGE.min(start_page.saturating_add(max_pages - 1));

    let mut raw = Vec::with_capacity((last_page - start_page + 1) as usize * PAGE_SIZE);
    let mut failed = None;
    for page in start_page..=last_page {
        match tag.read_page(page) {
            Ok(block) => raw.extend_from_slice(&block),
            Err(source) => {
                warn!(page, error = %source, "tag page read failed");
                failed = Some(ReadFailure { page, source });
                break;
            }
        }
        if !matches!(ndef::scan(&raw), Scan::Incomplete) {
            break;
        }
    }
    debug!(bytes = raw.len(), "read tag user memory");

    let message = match ndef::scan(&raw) {
        Scan::Found(message) => message,
        Scan::Terminated => return Ok(None),
        Scan::Incomplete => {
            return match failed {
                Some(ReadFailure { page, source }) => Err(StoreError::ReadError { page, source }),
                // Container runs past the pages we were allowed to read
                None => Ok(None),
            };
        }
    };

    let Some(text) = ndef::decode_text_record(message) else {
        debug!("NDEF message holds no Text record");
        return Ok(None);
    };
    // A stray terminator byte decodes as U+FFFD
    let text = text
        .trim_start_matches(|c: char| c.is_control() || c.is_whitespace())
        .trim_end_matches(|c: char| {
            c.is_control() || c.is_whitespace() || c == char::REPLACEMENT_CHARACTER
        });
    if text.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(text)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            source,
            snippet: text.chars().take(80).collect(),
        })
}

/// Write the spool document to the tag, returning the number of pages written.
///
/// Capacity is checked before the first page is touched.
pub fn write_document<T: PageIo + ?Sized>(
    tag: &mut T,
    payload: &TagPayload,
    start_page: u16,
) -> Result<usize, StoreError> {
    let text = serde_json::to_string(payload).map_err(StoreError::Serialize)?;
    let record = ndef::encode_text_record(&text, DEFAULT_LANGUAGE)?;
    let mut tlv = ndef::encode_container(&record)?;

    // NTAG writes are whole pages
    let padded_len = tlv.len().div_ceil(PAGE_SIZE) * PAGE_SIZE;
    tlv.resize(padded_len, ndef::NULL_TLV);

    let needed = tlv.len() / PAGE_SIZE;
    let available = (MAX_PAGE as usize + 1).saturating_sub(start_page as usize);
    if needed > available {
        return Err(StoreError::CapacityExceeded { needed, available });
    }

    for (offset, chunk) in tlv.chunks_exact(PAGE_SIZE).enumerate() {
        let page = start_page + offset as u16;
        let block = [chunk[0], chunk[1], chunk[2], chunk[3]];
        tag.write_page(page, &block)
            .map_err(|source| StoreError::WriteError { page, source })?;
    }
    debug!(pages = needed, bytes = text.len(), "wrote spool document");
    Ok(needed)
}

struct ReadFailure {
    page: u16,
    source: PageIoError,
}
