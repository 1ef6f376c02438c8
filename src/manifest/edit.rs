//! Version edits: the deltas recorded in the MANIFEST.
//!
//! An edit is a sequence of tagged fields. Integers are varint-encoded,
//! keys and names are length-prefixed. Decoding fails on any tag or field
//! it does not understand; the MANIFEST carries no forward-compatibility
//! promises.

use std::collections::BTreeSet;
use std::io::{Cursor, Read};

use integer_encoding::{VarIntReader, VarIntWriter};

use crate::corruption;
use crate::error::Result;
use crate::key::InternalKey;

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
// Tag 8 was used once for large value references; never reassigned.
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A file added by an edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFile {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

/// A delta between two versions. All fields are optional; whatever is unset
/// keeps its previous value when the edit is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, NewFile)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator_name = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Record a file created at `level` with its size and key bounds.
    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push((
            level,
            NewFile {
                number,
                file_size,
                smallest,
                largest,
            },
        ));
    }

    /// Record the removal of a file from `level`.
    pub fn remove_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        if let Some(name) = &self.comparator_name {
            buf.write_varint(TAG_COMPARATOR).unwrap();
            write_bytes(&mut buf, name.as_bytes());
        }
        if let Some(number) = self.log_number {
            buf.write_varint(TAG_LOG_NUMBER).unwrap();
            buf.write_varint(number).unwrap();
        }
        if let Some(number) = self.prev_log_number {
            buf.write_varint(TAG_PREV_LOG_NUMBER).unwrap();
            buf.write_varint(number).unwrap();
        }
        if let Some(number) = self.next_file_number {
            buf.write_varint(TAG_NEXT_FILE_NUMBER).unwrap();
            buf.write_varint(number).unwrap();
        }
        if let Some(sequence) = self.last_sequence {
            buf.write_varint(TAG_LAST_SEQUENCE).unwrap();
            buf.write_varint(sequence).unwrap();
        }
        for (level, key) in &self.compact_pointers {
            buf.write_varint(TAG_COMPACT_POINTER).unwrap();
            buf.write_varint(*level as u32).unwrap();
            write_bytes(&mut buf, key.as_bytes());
        }
        for (level, number) in &self.deleted_files {
            buf.write_varint(TAG_DELETED_FILE).unwrap();
            buf.write_varint(*level as u32).unwrap();
            buf.write_varint(*number).unwrap();
        }
        for (level, file) in &self.new_files {
            buf.write_varint(TAG_NEW_FILE).unwrap();
            buf.write_varint(*level as u32).unwrap();
            buf.write_varint(file.number).unwrap();
            buf.write_varint(file.file_size).unwrap();
            write_bytes(&mut buf, file.smallest.as_bytes());
            write_bytes(&mut buf, file.largest.as_bytes());
        }

        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut edit = Self::default();
        let mut cursor = Cursor::new(src);

        while (cursor.position() as usize) < src.len() {
            let tag: u32 = read_varint(&mut cursor, "tag")?;
            match tag {
                TAG_COMPARATOR => {
                    let name = read_bytes(&mut cursor, "comparator name")?;
                    edit.comparator_name = Some(
                        String::from_utf8(name)
                            .map_err(|_| crate::error::Error::Corruption(
                                "comparator name is not utf-8".to_string(),
                            ))?,
                    );
                }
                TAG_LOG_NUMBER => edit.log_number = Some(read_varint(&mut cursor, "log number")?),
                TAG_PREV_LOG_NUMBER => {
                    edit.prev_log_number = Some(read_varint(&mut cursor, "prev log number")?)
                }
                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number = Some(read_varint(&mut cursor, "next file number")?)
                }
                TAG_LAST_SEQUENCE => {
                    edit.last_sequence = Some(read_varint(&mut cursor, "last sequence")?)
                }
                TAG_COMPACT_POINTER => {
                    let level = read_level(&mut cursor)?;
                    let key = InternalKey::decode_from(read_bytes(&mut cursor, "compact pointer")?)?;
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let level = read_level(&mut cursor)?;
                    let number = read_varint(&mut cursor, "deleted file number")?;
                    edit.deleted_files.insert((level, number));
                }
                TAG_NEW_FILE => {
                    let level = read_level(&mut cursor)?;
                    let number = read_varint(&mut cursor, "new file number")?;
                    let file_size = read_varint(&mut cursor, "new file size")?;
                    let smallest =
                        InternalKey::decode_from(read_bytes(&mut cursor, "smallest key")?)?;
                    let largest =
                        InternalKey::decode_from(read_bytes(&mut cursor, "largest key")?)?;
                    edit.new_files.push((
                        level,
                        NewFile {
                            number,
                            file_size,
                            smallest,
                            largest,
                        },
                    ));
                }
                n => return corruption!("unknown version edit tag: {n}"),
            }
        }

        Ok(edit)
    }
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.write_varint(data.len() as u64).unwrap();
    buf.extend_from_slice(data);
}

fn read_varint<V: integer_encoding::VarInt>(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<V> {
    cursor
        .read_varint()
        .map_err(|_| crate::error::Error::Corruption(format!("truncated {what}")))
}

fn read_level(cursor: &mut Cursor<&[u8]>) -> Result<usize> {
    let level: u32 = read_varint(cursor, "level")?;
    Ok(level as usize)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<Vec<u8>> {
    let len: u64 = read_varint(cursor, what)?;
    let mut data = vec![0u8; len as usize];
    cursor
        .read_exact(&mut data)
        .map_err(|_| crate::error::Error::Corruption(format!("truncated {what}")))?;
    Ok(data)
}
