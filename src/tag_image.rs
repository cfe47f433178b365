//! # NTAG215 Page Image
//!
//! An in-memory NTAG215 that stands in for a tag sitting on a PN532-style
//! reader. It is used by the test suite, by the `simulate` command, and as the
//! on-disk format the CLI programs and inspects (a flat 540-byte dump of all 135
//! pages, the same layout `dump` prints).
//!
//! Besides plain page access it can pretend the tag left the field and inject
//! read/write failures at a given page.

use crate::tag_store::{PageIo, PageIoError, TagReader};
use crate::{Uid, MAX_PAGE, PAGE_SIZE, START_PAGE};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use std::{fs, io};

/// Total pages on an NTAG215, including the four header pages.
pub const NTAG215_PAGES: usize = MAX_PAGE as usize + 1;

/// Capability container for a 504-byte NDEF area, read/write access.
const CAPABILITY_CONTAINER: [u8; PAGE_SIZE] = [0xE1, 0x10, 0x3E, 0x00];

/// Empty NDEF TLV followed by a terminator, as tags leave the factory.
const EMPTY_NDEF: [u8; PAGE_SIZE] = [0x03, 0x00, 0xFE, 0x00];

/// Cascade tag byte folded into the first UID check byte.
const CASCADE_TAG: u8 = 0x88;

/// A simulated NTAG215.
#[derive(Clone, Debug)]
pub struct TagImage {
    uid: Uid,
    pages: Vec<[u8; PAGE_SIZE]>,
    present: bool,
    fail_read_at: Option<u16>,
    fail_write_at: Option<u16>,
    reads: usize,
    writes: usize,
}

impl TagImage {
    /// A factory-fresh tag with the given 7-byte UID.
    pub fn blank(uid: [u8; 7]) -> Self {
        let mut pages = vec![[0u8; PAGE_SIZE]; NTAG215_PAGES];
        let bcc0 = CASCADE_TAG ^ uid[0] ^ uid[1] ^ uid[2];
        let bcc1 = uid[3] ^ uid[4] ^ uid[5] ^ uid[6];
        pages[0] = [uid[0], uid[1], uid[2], bcc0];
        pages[1] = [uid[3], uid[4], uid[5], uid[6]];
        pages[2] = [bcc1, 0x48, 0x00, 0x00];
        pages[3] = CAPABILITY_CONTAINER;
        pages[START_PAGE as usize] = EMPTY_NDEF;

        Self::from_pages(pages)
    }

    /// A blank tag whose UID is derived from `seed`; handy for tests.
    pub fn blank_with_seed(seed: u8) -> Self {
        Self::blank([0x04, seed, 0x5A, 0x12, 0x34, seed ^ 0xFF, 0x80])
    }

    /// Rebuild an image from a 540-byte dump.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != NTAG215_PAGES * PAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "tag image is {} bytes, expected {}",
                    bytes.len(),
                    NTAG215_PAGES * PAGE_SIZE
                ),
            ));
        }
        let pages = bytes
            .chunks_exact(PAGE_SIZE)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        Ok(Self::from_pages(pages))
    }

    fn from_pages(pages: Vec<[u8; PAGE_SIZE]>) -> Self {
        let uid = Uid::new(vec![
            pages[0][0],
            pages[0][1],
            pages[0][2],
            pages[1][0],
            pages[1][1],
            pages[1][2],
            pages[1][3],
        ]);
        Self {
            uid,
            pages,
            present: true,
            fail_read_at: None,
            fail_write_at: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Load an image previously written with [`TagImage::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Write all 135 pages to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.to_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.pages.iter().flatten().copied().collect()
    }

    /// Bytes of the user area, pages 4..=134.
    pub fn user_bytes(&self) -> Vec<u8> {
        self.pages[START_PAGE as usize..]
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Whether [`TagReader::scan_for_tag`] sees the tag.
    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn fail_reads_at(&mut self, page: Option<u16>) {
        self.fail_read_at = page;
    }

    pub fn fail_writes_at(&mut self, page: Option<u16>) {
        self.fail_write_at = page;
    }

    /// Successful page reads since creation or the last counter reset.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Successful page writes since creation or the last counter reset.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn reset_counters(&mut self) {
        self.reads = 0;
        self.writes = 0;
    }

    /// Write raw bytes from `start_page`, zero-padding the last page.
    pub fn write_bytes(&mut self, start_page: u16, bytes: &[u8]) -> Result<(), PageIoError> {
        for (offset, chunk) in bytes.chunks(PAGE_SIZE).enumerate() {
            let mut block = [0u8; PAGE_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            self.write_page(start_page + offset as u16, &block)?;
        }
        Ok(())
    }

    /// Hex listing of every page, one per line.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(NTAG215_PAGES * 24);
        for (page, block) in self.pages.iter().enumerate() {
            let _ = writeln!(
                out,
                "Page {:03}: {:02X} {:02X} {:02X} {:02X}",
                page, block[0], block[1], block[2], block[3]
            );
        }
        out
    }
}

impl PageIo for TagImage {
    fn read_page(&mut self, page: u16) -> Result<[u8; PAGE_SIZE], PageIoError> {
        if self.fail_read_at == Some(page) {
            return Err(PageIoError(format!("no response reading page {}", page)));
        }
        let block = self
            .pages
            .get(page as usize)
            .copied()
            .ok_or_else(|| PageIoError(format!("page {} out of range", page)))?;
        self.reads += 1;
        Ok(block)
    }

    fn write_page(&mut self, page: u16, data: &[u8; PAGE_SIZE]) -> Result<(), PageIoError> {
        if !(START_PAGE..=MAX_PAGE).contains(&page) {
            return Err(PageIoError(format!("page {} is not user memory", page)));
        }
        if self.fail_write_at == Some(page) {
            return Err(PageIoError(format!("no ACK writing page {}", page)));
        }
        self.pages[page as usize] = *data;
        self.writes += 1;
        Ok(())
    }
}

impl TagReader for TagImage {
    fn scan_for_tag(&mut self, _timeout: Duration) -> Option<Uid> {
        self.present.then(|| self.uid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_blank_layout() {
        let mut tag = TagImage::blank([0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(tag.uid().to_string(), "04:11:22:33:44:55:66");
        assert_eq!(tag.read_page(0).unwrap(), [0x04, 0x11, 0x22, 0x88 ^ 0x04 ^ 0x11 ^ 0x22]);
        assert_eq!(tag.read_page(3).unwrap(), CAPABILITY_CONTAINER);
        assert_eq!(tag.read_page(START_PAGE).unwrap(), EMPTY_NDEF);
        assert!(tag.read_page(MAX_PAGE + 1).is_err());
    }

    #[test]
    fn test_header_pages_are_read_only() {
        let mut tag = TagImage::blank_with_seed(1);
        assert!(tag.write_page(2, &[0xFF; 4]).is_err());
        assert!(tag.write_page(MAX_PAGE + 1, &[0xFF; 4]).is_err());
        assert!(tag.write_page(MAX_PAGE, &[0xFF; 4]).is_ok());
        assert_eq!(tag.writes(), 1);
    }

    #[test]
    fn test_presence_controls_scan() {
        let mut tag = TagImage::blank_with_seed(2);
        let uid = tag.uid().clone();
        assert_eq!(tag.scan_for_tag(Duration::from_millis(100)), Some(uid));
        tag.set_present(false);
        assert_eq!(tag.scan_for_tag(Duration::from_millis(100)), None);
    }

    #[test]
    fn test_fault_injection() {
        let mut tag = TagImage::blank_with_seed(3);
        tag.fail_reads_at(Some(6));
        tag.fail_writes_at(Some(7));
        assert!(tag.read_page(6).is_err());
        assert!(tag.read_page(7).is_ok());
        assert!(tag.write_page(7, &[1, 2, 3, 4]).is_err());
        assert!(tag.write_page(6, &[1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn test_file_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut tag = TagImage::blank_with_seed(4);
        tag.write_bytes(START_PAGE, b"hello world").unwrap();
        tag.save(file.path()).unwrap();

        let loaded = TagImage::load(file.path()).unwrap();
        assert_eq!(loaded.uid(), tag.uid());
        assert_eq!(loaded.to_bytes(), tag.to_bytes());
        assert!(loaded.user_bytes().starts_with(b"hello world\0"));
    }

    #[test]
    fn test_rejects_wrong_size_image() {
        assert!(TagImage::from_bytes(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_dump_lists_every_page() {
        let dump = TagImage::blank_with_seed(5).dump();
        assert_eq!(dump.lines().count(), NTAG215_PAGES);
        assert!(dump.contains("Page 003: E1 10 3E 00"));
        assert!(dump.contains("Page 004: 03 00 FE 00"));
    }
}
