//! Framed, checksummed append-only files.
//!
//! Both the operation log and the commit log are stored in this format. A file starts with a
//! fixed header (magic + version) followed by records:
//!
//! ```text
//! [record_type: u8][payload_len: u32 LE][crc32: u32 LE][payload]
//! ```
//!
//! The checksum covers the record type, the payload length and the payload. Opening a file scans
//! every record; anything after the last valid record (a torn write or a corrupt frame) is
//! truncated so later appends continue from a clean tail.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use tracing::{debug, warn};

use crate::errors::{StorageError, TxnKvError};

/// Log file format version
const LOG_VERSION: u16 = 1;
/// File header size: magic (8) + version (2) + reserved (6)
pub(crate) const FILE_HEADER_SIZE: usize = 16;
/// Record header size: type (1) + payload length (4) + crc32 (4)
const RECORD_HEADER_SIZE: usize = 9;

/// A record as stored on disk, before the owning log decodes its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawRecord {
    pub record_type: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct LogFile {
    path: PathBuf,
    file: File,
    magic: [u8; 8],
    sync_every_write: bool,
    end_offset: u64,
}

impl LogFile {
    /// Open the log at `path`, creating it when missing, and return every valid record in it.
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        magic: &[u8; 8],
        sync_every_write: bool,
    ) -> Result<(Self, Vec<RawRecord>), TxnKvError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.len() < FILE_HEADER_SIZE {
            if !data.is_empty() {
                warn!(
                    path = %path.display(),
                    len = data.len(),
                    "rewriting log with incomplete header"
                );
            }
            write_header(&mut file, magic)?;
            let log = Self {
                path,
                file,
                magic: *magic,
                sync_every_write,
                end_offset: FILE_HEADER_SIZE as u64,
            };
            return Ok((log, Vec::new()));
        }

        validate_header(&data[..FILE_HEADER_SIZE], magic, &path)?;

        let (records, valid_end, truncate_reason) = parse_records(&data);
        if valid_end < data.len() {
            warn!(
                path = %path.display(),
                offset = valid_end,
                reason = truncate_reason.as_deref().unwrap_or("unknown"),
                "truncating invalid log tail"
            );
            file.set_len(valid_end as u64)?;
            file.sync_all()?;
        }
        debug!(path = %path.display(), records = records.len(), "opened log");

        let log = Self {
            path,
            file,
            magic: *magic,
            sync_every_write,
            end_offset: valid_end as u64,
        };
        Ok((log, records))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. The record is flushed (and synced when configured) before returning.
    pub fn append(&mut self, record_type: u8, payload: &[u8]) -> Result<(), TxnKvError> {
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| StorageError(format!("log record too large: {} bytes", payload.len())))?;

        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        buf.write_u8(record_type)?;
        buf.write_u32::<LittleEndian>(payload_len)?;
        buf.write_u32::<LittleEndian>(record_crc(record_type, payload_len, payload))?;
        buf.extend_from_slice(payload);

        self.file.seek(SeekFrom::Start(self.end_offset))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        if self.sync_every_write {
            self.file.sync_data()?;
        }
        self.end_offset += buf.len() as u64;
        Ok(())
    }

    /// Drop every record, keeping only the file header.
    pub fn truncate(&mut self) -> Result<(), TxnKvError> {
        self.file.set_len(FILE_HEADER_SIZE as u64)?;
        self.file.sync_all()?;
        self.end_offset = FILE_HEADER_SIZE as u64;
        debug!(path = %self.path.display(), magic = ?self.magic, "truncated log");
        Ok(())
    }
}

fn write_header(file: &mut File, magic: &[u8; 8]) -> Result<(), TxnKvError> {
    let mut header = Vec::with_capacity(FILE_HEADER_SIZE);
    header.extend_from_slice(magic);
    header.write_u16::<LittleEndian>(LOG_VERSION)?;
    header.resize(FILE_HEADER_SIZE, 0);

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.sync_all()?;
    Ok(())
}

fn validate_header(data: &[u8], magic: &[u8; 8], path: &Path) -> Result<(), TxnKvError> {
    if &data[..8] != magic {
        return Err(StorageError(format!(
            "invalid log magic in {}: {:?}",
            path.display(),
            &data[..8]
        ))
        .into());
    }
    let mut cursor = Cursor::new(&data[8..10]);
    let version = cursor.read_u16::<LittleEndian>()?;
    if version != LOG_VERSION {
        return Err(StorageError(format!(
            "unsupported log version {version} in {}",
            path.display()
        ))
        .into());
    }
    Ok(())
}

/// Returns the valid records, the offset just past the last valid record, and why scanning
/// stopped early (if it did).
fn parse_records(data: &[u8]) -> (Vec<RawRecord>, usize, Option<String>) {
    let mut records = Vec::new();
    let mut offset = FILE_HEADER_SIZE;

    while offset < data.len() {
        match parse_record(&data[offset..]) {
            Ok((record, size)) => {
                records.push(record);
                offset += size;
            }
            Err(reason) => return (records, offset, Some(reason)),
        }
    }

    (records, offset, None)
}

fn parse_record(data: &[u8]) -> Result<(RawRecord, usize), String> {
    if data.len() < RECORD_HEADER_SIZE {
        return Err(format!("short record header ({} bytes)", data.len()));
    }

    let mut cursor = Cursor::new(data);
    let record_type = cursor.read_u8().map_err(|e| e.to_string())?;
    let payload_len = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let expected = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;

    let end = RECORD_HEADER_SIZE + payload_len as usize;
    if data.len() < end {
        return Err(format!(
            "truncated payload: need {payload_len} bytes, have {}",
            data.len() - RECORD_HEADER_SIZE
        ));
    }

    let payload = &data[RECORD_HEADER_SIZE..end];
    let actual = record_crc(record_type, payload_len, payload);
    if actual != expected {
        return Err(format!(
            "checksum mismatch: expected {expected:08x}, got {actual:08x}"
        ));
    }

    Ok((
        RawRecord {
            record_type,
            payload: payload.to_vec(),
        },
        end,
    ))
}

fn record_crc(record_type: u8, payload_len: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[record_type]);
    hasher.update(&payload_len.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

pub(crate) fn write_string(buf: &mut Vec<u8>, value: &str) -> Result<(), TxnKvError> {
    let len = u32::try_from(value.len())
        .map_err(|_| StorageError(format!("string too long: {} bytes", value.len())))?;
    buf.write_u32::<LittleEndian>(len)?;
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, TxnKvError> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| StorageError(format!("invalid utf8 in key: {e}")).into())
}
