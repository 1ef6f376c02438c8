//! Record framing for the MANIFEST log.
//!
//! The file is a sequence of 32KB blocks. A record never straddles a block
//! boundary; instead it is split into fragments, each with its own header:
//!
//! ```text
//! +-------------+------------+----------+---------------+
//! | crc32c: u32 | length: u16| type: u8 | payload (var) |
//! +-------------+------------+----------+---------------+
//! ```
//!
//! The checksum covers the type byte and the payload. `type` marks the
//! fragment's position in its record (FULL, or FIRST/MIDDLE/LAST). When
//! fewer than seven bytes remain in a block they are zero-filled and the
//! writer moves to the next block; the reader skips such trailers.
//!
//! A torn tail (a fragment cut off by a crash mid-append) reads as a clean
//! end of log. A checksum mismatch or an impossible fragment sequence is
//! corruption.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use crc::Crc;

use crate::corruption;
use crate::env::AppendFile;
use crate::error::Result;

pub const BLOCK_SIZE: usize = 32 * 1024;
pub const HEADER_SIZE: usize = 4 + 2 + 1;

const CRC32C: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISCSI);

const FULL: u8 = 1;
const FIRST: u8 = 2;
const MIDDLE: u8 = 3;
const LAST: u8 = 4;

fn fragment_checksum(record_type: u8, payload: &[u8]) -> u32 {
    let mut digest = CRC32C.digest();
    digest.update(&[record_type]);
    digest.update(payload);
    digest.finalize()
}

pub struct Writer {
    dest: Box<dyn AppendFile>,
    block_offset: usize,
}

impl Writer {
    pub fn new(dest: Box<dyn AppendFile>) -> Self {
        Self {
            dest,
            block_offset: 0,
        }
    }

    /// Resume writing a log whose first `length` bytes already exist.
    pub fn with_initial_length(dest: Box<dyn AppendFile>, length: u64) -> Self {
        Self {
            dest,
            block_offset: (length % BLOCK_SIZE as u64) as usize,
        }
    }

    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                if leftover > 0 {
                    self.dest.append(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            let available = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment = (data.len() - offset).min(available);
            let end = offset + fragment == data.len();
            let record_type = match (begin, end) {
                (true, true) => FULL,
                (true, false) => FIRST,
                (false, true) => LAST,
                (false, false) => MIDDLE,
            };
            self.emit(record_type, &data[offset..offset + fragment])?;
            offset += fragment;
            begin = false;
            if end {
                return Ok(());
            }
        }
    }

    fn emit(&mut self, record_type: u8, payload: &[u8]) -> Result<()> {
        assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);
        let mut header = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], fragment_checksum(record_type, payload));
        LittleEndian::write_u16(&mut header[4..6], payload.len() as u16);
        header[6] = record_type;
        self.dest.append(&header)?;
        self.dest.append(payload)?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.dest.flush()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }
}

pub struct Reader {
    src: Box<dyn Read + Send>,
    block: Vec<u8>,
    pos: usize,
    eof: bool,
}

enum Fragment {
    Data(u8, Vec<u8>),
    End,
}

impl Reader {
    pub fn new(src: Box<dyn Read + Send>) -> Self {
        Self {
            src,
            block: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// Returns the next full record, or `None` at the end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut assembled: Option<Vec<u8>> = None;
        loop {
            let (record_type, payload) = match self.next_fragment()? {
                Fragment::Data(t, p) => (t, p),
                // A record interrupted by the end of the log is a torn tail
                // from a crash mid-append; everything before it is valid.
                Fragment::End => return Ok(None),
            };
            match (record_type, &mut assembled) {
                (FULL, None) => return Ok(Some(payload)),
                (FIRST, None) => assembled = Some(payload),
                (MIDDLE, Some(buf)) => buf.extend_from_slice(&payload),
                (LAST, Some(buf)) => {
                    buf.extend_from_slice(&payload);
                    return Ok(Some(std::mem::take(buf)));
                }
                (FULL | FIRST, Some(_)) => {
                    return corruption!("new record started mid-record");
                }
                (MIDDLE | LAST, None) => {
                    return corruption!("continuation fragment without a start");
                }
                (t, _) => return corruption!("unknown record fragment type: {t}"),
            }
        }
    }

    fn next_fragment(&mut self) -> Result<Fragment> {
        loop {
            if self.block.len() - self.pos < HEADER_SIZE {
                // Block trailer (or nothing buffered yet): move to the next block.
                if !self.fill_block()? {
                    return Ok(Fragment::End);
                }
                continue;
            }
            let header = &self.block[self.pos..self.pos + HEADER_SIZE];
            let stored_crc = LittleEndian::read_u32(&header[0..4]);
            let length = LittleEndian::read_u16(&header[4..6]) as usize;
            let record_type = header[6];

            if record_type == 0 && length == 0 {
                // Zero-filled padding; nothing else lives in this block.
                self.pos = self.block.len();
                continue;
            }
            let payload_start = self.pos + HEADER_SIZE;
            if payload_start + length > self.block.len() {
                if self.eof {
                    // Torn fragment at the end of the file.
                    return Ok(Fragment::End);
                }
                return corruption!(
                    "fragment length {length} overflows its block"
                );
            }
            let payload = self.block[payload_start..payload_start + length].to_vec();
            if fragment_checksum(record_type, &payload) != stored_crc {
                return corruption!("record checksum mismatch");
            }
            self.pos = payload_start + length;
            return Ok(Fragment::Data(record_type, payload));
        }
    }

    /// Reads the next block. Returns false at the end of the log.
    fn fill_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.src.read(&mut block[filled..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }
        block.truncate(filled);
        self.block = block;
        self.pos = 0;
        Ok(filled > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{DiskEnv, Env};
    use crate::error::Error;
    use tempfile::TempDir;

    fn write_records(env: &DiskEnv, path: &std::path::Path, records: &[Vec<u8>]) {
        let mut writer = Writer::new(env.create(path).unwrap());
        for record in records {
            writer.add_record(record).unwrap();
        }
        writer.sync().unwrap();
    }

    fn read_all(env: &DiskEnv, path: &std::path::Path) -> Result<Vec<Vec<u8>>> {
        let mut reader = Reader::new(env.open(path).unwrap());
        let mut records = Vec::new();
        while let Some(record) = reader.read_record()? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn test_roundtrip_small_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let env = DiskEnv;

        let records = vec![b"one".to_vec(), b"two".to_vec(), Vec::new(), b"four".to_vec()];
        write_records(&env, &path, &records);
        assert_eq!(read_all(&env, &path).unwrap(), records);
    }

    #[test]
    fn test_roundtrip_record_spanning_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let env = DiskEnv;

        // Big enough to need FIRST/MIDDLE/LAST fragments across three blocks.
        let big: Vec<u8> = (0..BLOCK_SIZE * 2 + 1000).map(|i| (i % 251) as u8).collect();
        let records = vec![b"before".to_vec(), big.clone(), b"after".to_vec()];
        write_records(&env, &path, &records);
        assert_eq!(read_all(&env, &path).unwrap(), records);
    }

    #[test]
    fn test_block_trailer_padding() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let env = DiskEnv;

        // Leave fewer than HEADER_SIZE bytes in the first block so the second
        // record starts at a block boundary after zero padding.
        let first_len = BLOCK_SIZE - HEADER_SIZE - 3;
        let records = vec![vec![b'a'; first_len], b"next-block".to_vec()];
        write_records(&env, &path, &records);
        assert_eq!(read_all(&env, &path).unwrap(), records);
    }

    #[test]
    fn test_checksum_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let env = DiskEnv;

        write_records(&env, &path, &[b"payload".to_vec()]);

        // Flip a payload byte.
        let mut contents = std::fs::read(&path).unwrap();
        let last = contents.len() - 1;
        contents[last] ^= 0xff;
        std::fs::write(&path, &contents).unwrap();

        assert!(matches!(
            read_all(&env, &path),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_torn_tail_reads_as_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let env = DiskEnv;

        write_records(&env, &path, &[b"kept".to_vec(), b"torn-away".to_vec()]);

        // Drop the last few bytes, cutting the second record mid-fragment.
        let contents = std::fs::read(&path).unwrap();
        std::fs::write(&path, &contents[..contents.len() - 4]).unwrap();

        assert_eq!(read_all(&env, &path).unwrap(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_resume_with_initial_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let env = DiskEnv;

        write_records(&env, &path, &[b"first".to_vec()]);
        let length = env.file_size(&path).unwrap();

        let mut writer = Writer::with_initial_length(env.append(&path).unwrap(), length);
        writer.add_record(b"second").unwrap();
        writer.sync().unwrap();

        assert_eq!(
            read_all(&env, &path).unwrap(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }
}
