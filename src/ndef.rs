//! # NDEF Text Record Codec
//!
//! Bit-exact encoding of the single NDEF Text record a spool tag carries, and of
//! the TLV container that frames it inside NTAG user memory.
//!
//! ## Record layout
//! ```text
//! [0xD1 short | 0xC1 long] 0x01 [len:1 | len:4 BE] 'T' [status] [lang] [text]
//! ```
//! The status byte holds the language length in bits 5..0 and the UTF-16 flag in
//! bit 7. Records are always written as UTF-8.
//!
//! ## Container layout
//! ```text
//! 0x03 [len:1 | 0xFF len:2 BE] [record] 0xFE
//! ```
//! Decoding never fails: anything that is not a well-formed Text record inside an
//! NDEF TLV decodes to `None`, which callers treat as a blank tag.

use thiserror::Error;

/// TLV type of an NDEF message.
pub const NDEF_TLV: u8 = 0x03;
/// TLV that ends the TLV area.
pub const TERMINATOR_TLV: u8 = 0xFE;
/// Single-byte padding TLV.
pub const NULL_TLV: u8 = 0x00;

/// Largest value length that fits the one-byte TLV length form.
pub const MAX_SHORT_TLV_LEN: usize = 0xFE;
/// Largest value length the three-byte TLV length form can express.
pub const MAX_TLV_LEN: usize = 0xFFFE;
/// Largest Text payload (status + language + text) accepted by the encoder.
pub const MAX_TEXT_PAYLOAD: usize = 0xFFFF;
/// Language codes are limited by the 6-bit length field of the status byte.
pub const MAX_LANGUAGE_LEN: usize = 0x3F;

const HEADER_SHORT: u8 = 0xD1; // MB | ME | SR | TNF=well-known
const HEADER_LONG: u8 = 0xC1; // MB | ME | TNF=well-known
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;
const TNF_WELL_KNOWN: u8 = 0x01;
const TEXT_TYPE: &[u8] = b"T";
const STATUS_UTF16: u8 = 0x80;
const STATUS_LANG_MASK: u8 = 0x3F;

/// Errors raised while building a record or container.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Language code longer than the status byte can describe
    #[error("language code is {0} bytes, at most {MAX_LANGUAGE_LEN} allowed")]
    LanguageTooLong(usize),

    /// Record or container payload larger than its length field allows
    #[error("payload of {0} bytes is too large for an NDEF record")]
    PayloadTooLarge(usize),
}

/// Build a single-record NDEF message holding `text` as a Text record.
///
/// The short-record header is used while the payload fits in one length byte.
///
/// # Example
/// ```
/// use filament_monitor_lib::ndef::encode_text_record;
///
/// let record = encode_text_record("hi", "en").unwrap();
/// assert_eq!(record, vec![0xD1, 0x01, 0x05, b'T', 0x02, b'e', b'n', b'h', b'i']);
/// ```
pub fn encode_text_record(text: &str, language: &str) -> Result<Vec<u8>, CodecError> {
    let lang = language.as_bytes();
    if lang.len() > MAX_LANGUAGE_LEN {
        return Err(CodecError::LanguageTooLong(lang.len()));
    }

    let payload_len = 1 + lang.len() + text.len();
    if payload_len > MAX_TEXT_PAYLOAD {
        return Err(CodecError::PayloadTooLarge(payload_len));
    }

    let short = payload_len <= 0xFF;
    let mut record = Vec::with_capacity(payload_len + 7);
    record.push(if short { HEADER_SHORT } else { HEADER_LONG });
    record.push(TEXT_TYPE.len() as u8);
    if short {
        record.push(payload_len as u8);
    } else {
        record.extend_from_slice(&(payload_len as u32).to_be_bytes());
    }
    record.extend_from_slice(TEXT_TYPE);
    // UTF-8 flag cleared, language length in the low six bits
    record.push(lang.len() as u8 & STATUS_LANG_MASK);
    record.extend_from_slice(lang);
    record.extend_from_slice(text.as_bytes());
    Ok(record)
}

/// Extract the text of the first record of an NDEF message.
///
/// Returns `None` when the record is not a well-known `T` record, is chunked,
/// or is truncated. Text is decoded lossily: damaged bytes come back as
/// U+FFFD so a half-written record fails JSON parsing instead of looking blank.
pub fn decode_text_record(message: &[u8]) -> Option<String> {
    let mut reader = ByteReader::new(message);
    let header = reader.u8()?;
    if header & TNF_MASK != TNF_WELL_KNOWN || header & FLAG_CF != 0 {
        return None;
    }

    let type_len = reader.u8()? as usize;
    let payload_len = if header & FLAG_SR != 0 {
        reader.u8()? as usize
    } else {
        u32::from_be_bytes(reader.array::<4>()?) as usize
    };
    let id_len = if header & FLAG_IL != 0 {
        reader.u8()? as usize
    } else {
        0
    };

    if reader.take(type_len)? != TEXT_TYPE {
        return None;
    }
    reader.take(id_len)?;
    let payload = reader.take(payload_len)?;

    let Some((&status, rest)) = payload.split_first() else {
        return Some(String::new());
    };
    let lang_len = (status & STATUS_LANG_MASK) as usize;
    let text = rest.get(lang_len..)?;

    if status & STATUS_UTF16 != 0 {
        Some(decode_utf16(text))
    } else {
        Some(String::from_utf8_lossy(text).into_owned())
    }
}

/// Wrap an NDEF message in an NDEF TLV followed by a terminator TLV.
///
/// # Example
/// ```
/// use filament_monitor_lib::ndef::encode_container;
///
/// assert_eq!(encode_container(&[0xAA]).unwrap(), vec![0x03, 0x01, 0xAA, 0xFE]);
/// ```
pub fn encode_container(record: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = record.len();
    if len > MAX_TLV_LEN {
        return Err(CodecError::PayloadTooLarge(len));
    }

    let mut tlv = Vec::with_capacity(len + 5);
    tlv.push(NDEF_TLV);
    if len > MAX_SHORT_TLV_LEN {
        tlv.push(0xFF);
        tlv.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        tlv.push(len as u8);
    }
    tlv.extend_from_slice(record);
    tlv.push(TERMINATOR_TLV);
    Ok(tlv)
}

/// Result of walking the TLV area of a (possibly partial) buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Scan<'a> {
    /// Complete value of the first NDEF TLV
    Found(&'a [u8]),
    /// Terminator TLV reached before any NDEF TLV
    Terminated,
    /// Buffer ends inside a TLV or before a terminator; more bytes may help
    Incomplete,
}

/// Walk TLVs from the start of `buffer`, skipping null padding and foreign TLVs.
pub fn scan(buffer: &[u8]) -> Scan<'_> {
    let mut idx = 0;
    while idx < buffer.len() {
        match buffer[idx] {
            NULL_TLV => idx += 1,
            TERMINATOR_TLV => return Scan::Terminated,
            tlv_type => {
                let Some((len, len_bytes)) = tlv_length(&buffer[idx + 1..]) else {
                    return Scan::Incomplete;
                };
                let start = idx + 1 + len_bytes;
                let end = start + len;
                if end > buffer.len() {
                    return Scan::Incomplete;
                }
                if tlv_type == NDEF_TLV {
                    return Scan::Found(&buffer[start..end]);
                }
                idx = end;
            }
        }
    }
    Scan::Incomplete
}

/// Return the NDEF message of the first NDEF TLV in `buffer`, if complete.
pub fn scan_containers(buffer: &[u8]) -> Option<&[u8]> {
    match scan(buffer) {
        Scan::Found(message) => Some(message),
        Scan::Terminated | Scan::Incomplete => None,
    }
}

/// Decode a TLV length field, returning `(length, bytes used)`.
fn tlv_length(bytes: &[u8]) -> Option<(usize, usize)> {
    match *bytes.first()? {
        0xFF => {
            let hi = *bytes.get(1)?;
            let lo = *bytes.get(2)?;
            Some((u16::from_be_bytes([hi, lo]) as usize, 3))
        }
        len => Some((len as usize, 1)),
    }
}

fn decode_utf16(bytes: &[u8]) -> String {
    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (false, bytes),
    };
    let units = body.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Bounds-checked forward reader over a byte slice.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }
}
