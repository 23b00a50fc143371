//! Manifest log framing.
//!
//! Each encoded version edit is stored as one record:
//! - Checksum (4 bytes): CRC32 of the payload
//! - Length (4 bytes): Length of the payload
//! - Payload (variable): The encoded edit
//!
//! A record is written with a single `write_all` and synced before the caller
//! treats it as durable. A short record at the tail (a torn append) is
//! dropped on recovery; a complete record with a bad checksum is corruption.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Size of the record header (checksum + length)
pub const HEADER_SIZE: usize = 8;

/// Frames a payload as a manifest record.
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32_le(checksum(payload));
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.to_vec()
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// The records of a manifest file and the length of its valid prefix.
#[derive(Debug, Default)]
pub struct ManifestContents {
    /// Payloads of every complete record, in append order
    pub records: Vec<Vec<u8>>,
    /// Byte length covered by complete records
    pub valid_len: u64,
}

/// Splits raw manifest bytes into record payloads.
pub fn decode_records(data: &[u8]) -> Result<ManifestContents> {
    let mut contents = ManifestContents::default();
    let mut cursor = data;

    while !cursor.is_empty() {
        if cursor.len() < HEADER_SIZE {
            log::warn!("Dropping torn manifest header ({} trailing bytes)", cursor.len());
            break;
        }

        let mut header = &cursor[..HEADER_SIZE];
        let expected = header.get_u32_le();
        let length = header.get_u32_le() as usize;

        if cursor.len() - HEADER_SIZE < length {
            log::warn!(
                "Dropping torn manifest record: expected {} bytes, got {}",
                length,
                cursor.len() - HEADER_SIZE
            );
            break;
        }

        let payload = &cursor[HEADER_SIZE..HEADER_SIZE + length];
        let actual = checksum(payload);
        if actual != expected {
            return Err(Error::corruption(format!(
                "manifest record at offset {}: checksum mismatch: expected {:#x}, got {:#x}",
                contents.valid_len, expected, actual
            )));
        }

        contents.records.push(payload.to_vec());
        contents.valid_len += (HEADER_SIZE + length) as u64;
        cursor = &cursor[HEADER_SIZE + length..];
    }

    Ok(contents)
}

/// Reads every complete record from a manifest file.
pub fn read_manifest(path: &Path) -> Result<ManifestContents> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    decode_records(&data)
}

/// Destination of manifest records.
///
/// `truncate` must cut the sink back to `len` bytes so that the next write
/// lands right after the last complete record.
pub trait LogSink: Write {
    /// Cuts the sink to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Makes written bytes durable.
    fn sync(&mut self) -> io::Result<()>;
}

impl LogSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append-only writer for the manifest log.
///
/// An append either lands as one complete record or leaves the log at its
/// previous length. If a failed append cannot be undone the writer refuses
/// further appends until the manifest is reopened and recovered.
pub struct ManifestWriter<S: LogSink = File> {
    path: PathBuf,
    sink: S,
    sync: bool,
    /// Length covered by complete records
    len: u64,
    poisoned: bool,
}

impl ManifestWriter<File> {
    /// Creates (or truncates) a manifest file.
    pub fn create(path: &Path, sync: bool) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        Ok(Self::with_sink(path, file, 0, sync))
    }

    /// Opens an existing manifest for appending after cutting it to `valid_len`.
    pub fn reopen(path: &Path, valid_len: u64, sync: bool) -> Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        if file.metadata()?.len() != valid_len {
            log::warn!("Truncating manifest {:?} to {} bytes", path, valid_len);
            file.set_len(valid_len)?;
        }
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self::with_sink(path, file, valid_len, sync))
    }
}

impl<S: LogSink> ManifestWriter<S> {
    /// Wraps a sink that already holds `len` bytes of complete records.
    pub fn with_sink(path: &Path, sink: S, len: u64, sync: bool) -> Self {
        Self { path: path.to_path_buf(), sink, sync, len, poisoned: false }
    }

    /// Appends one framed record and makes it durable.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(Error::invalid_state(format!(
                "manifest {:?} has a partial record; reopen to recover",
                self.path
            )));
        }

        let record = encode_record(payload);
        match self.write_record(&record) {
            Ok(()) => {
                self.len += record.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(undo) = self.sink.truncate(self.len) {
                    log::error!(
                        "Failed to cut manifest {:?} back to {} bytes: {}",
                        self.path,
                        self.len,
                        undo
                    );
                    self.poisoned = true;
                }
                Err(e.into())
            }
        }
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.sink.write_all(record)?;
        self.sink.flush()?;
        if self.sync {
            self.sink.sync()?;
        }
        Ok(())
    }

    /// Byte length of the complete records written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if no record has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the manifest file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
