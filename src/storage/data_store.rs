use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{StorageError, TxnKvError};

pub const DATA_FILE_NAME: &str = "data.jsonl";

#[derive(Debug, Serialize)]
struct Record<'a> {
    key: &'a str,
    value: i64,
}

#[derive(Debug, Deserialize)]
struct OwnedRecord {
    key: String,
    value: i64,
}

/// Persistent key → integer mapping holding committed state.
///
/// Stored as JSON lines, one record per `set`; the last record for a key wins when the file is
/// loaded. Every `set` is flushed (and fsynced when `sync_every_write` is on) before it returns.
#[derive(Debug)]
pub struct DurableStore {
    path: PathBuf,
    file: File,
    sync_every_write: bool,
    /// Length of the file up to the last complete record.
    end_offset: u64,
    values: HashMap<String, i64>,
}

impl DurableStore {
    pub fn path_for_db<P: AsRef<Path>>(db_dir: P) -> PathBuf {
        db_dir.as_ref().join(DATA_FILE_NAME)
    }

    pub fn open<P: AsRef<Path>>(db_dir: P, sync_every_write: bool) -> Result<Self, TxnKvError> {
        let path = Self::path_for_db(db_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (values, end_offset) = load_existing(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        debug!(path = %path.display(), keys = values.len(), "opened durable store");

        Ok(Self {
            path,
            file,
            sync_every_write,
            end_offset,
            values,
        })
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }

    /// Upsert `key`. Durable once this returns.
    pub fn set(&mut self, key: &str, value: i64) -> Result<(), TxnKvError> {
        let mut payload = serde_json::to_vec(&Record { key, value })?;
        payload.push(b'\n');

        if let Err(err) = self.write_record(&payload) {
            // Drop whatever part of the record reached the file.
            if let Err(trim_err) = self.file.set_len(self.end_offset) {
                warn!(
                    path = %self.path.display(),
                    offset = self.end_offset,
                    %trim_err,
                    "failed to trim partial record"
                );
            }
            return Err(err);
        }

        self.end_offset += payload.len() as u64;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn write_record(&mut self, payload: &[u8]) -> Result<(), TxnKvError> {
        self.file.seek(SeekFrom::Start(self.end_offset))?;
        self.file.write_all(payload)?;
        self.file.flush()?;
        if self.sync_every_write {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Every key/value pair, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        let mut out: Vec<(String, i64)> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort();
        out
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.values.len()
    }
}

/// Load every complete record and return the values plus the length of the valid prefix.
fn load_existing(path: &Path) -> Result<(HashMap<String, i64>, u64), TxnKvError> {
    let mut values = HashMap::new();
    if !path.exists() {
        return Ok((values, 0));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut offset = 0u64;
    let mut torn_tail = false;

    loop {
        let mut line = Vec::new();
        let bytes = reader.read_until(b'\n', &mut line)?;
        if bytes == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            // A set() that never returned; the record was not durable.
            torn_tail = true;
            break;
        }
        offset += bytes as u64;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record: OwnedRecord = serde_json::from_slice(&line).map_err(|e| {
            StorageError(format!(
                "corrupt record in {} before offset {offset}: {e}",
                path.display()
            ))
        })?;
        values.insert(record.key, record.value);
    }

    if torn_tail {
        warn!(
            path = %path.display(),
            offset,
            "truncating unterminated record at end of durable store"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset)?;
        file.sync_all()?;
    }

    Ok((values, offset))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn set_then_get_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let mut store = DurableStore::open(dir.path(), true).unwrap();
            store.set("A", 100).unwrap();
            store.set("B", 200).unwrap();
            store.set("A", 500).unwrap();
            assert_eq!(store.get("A"), Some(500));
        }

        let store = DurableStore::open(dir.path(), false).unwrap();
        assert_eq!(store.get("A"), Some(500));
        assert_eq!(store.get("B"), Some(200));
        assert_eq!(store.get("C"), None);
        assert_eq!(store.key_count(), 2);
    }

    #[test]
    fn zero_is_distinct_from_absent() {
        let dir = tempdir().unwrap();
        let mut store = DurableStore::open(dir.path(), true).unwrap();

        store.set("zero", 0).unwrap();

        assert_eq!(store.get("zero"), Some(0));
        assert_eq!(store.get("none"), None);
    }

    #[test]
    fn unterminated_tail_is_dropped() {
        let dir = tempdir().unwrap();

        {
            let mut store = DurableStore::open(dir.path(), true).unwrap();
            store.set("A", 1).unwrap();
        }
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(DurableStore::path_for_db(dir.path()))
                .unwrap();
            file.write_all(br#"{"key":"B","val"#).unwrap();
        }

        {
            let mut store = DurableStore::open(dir.path(), true).unwrap();
            assert_eq!(store.get("B"), None);
            store.set("C", 3).unwrap();
        }

        let store = DurableStore::open(dir.path(), true).unwrap();
        assert_eq!(
            store.snapshot(),
            vec![("A".to_string(), 1), ("C".to_string(), 3)]
        );
    }

    #[test]
    fn unterminated_non_utf8_tail_is_dropped() {
        let dir = tempdir().unwrap();

        {
            let mut store = DurableStore::open(dir.path(), true).unwrap();
            store.set("A", 1).unwrap();
        }
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(DurableStore::path_for_db(dir.path()))
                .unwrap();
            // set("ключ", ..) cut off inside the first two-byte character.
            file.write_all(b"{\"key\":\"\xd0").unwrap();
        }

        {
            let mut store = DurableStore::open(dir.path(), true).unwrap();
            assert_eq!(store.snapshot(), vec![("A".to_string(), 1)]);
            store.set("ключ", 2).unwrap();
        }

        let store = DurableStore::open(dir.path(), true).unwrap();
        assert_eq!(store.get("ключ"), Some(2));
        assert_eq!(store.key_count(), 2);
    }

    #[test]
    fn set_writes_over_bytes_past_last_record() {
        let dir = tempdir().unwrap();
        let path = DurableStore::path_for_db(dir.path());

        let mut store = DurableStore::open(dir.path(), true).unwrap();
        store.set("X", 1).unwrap();
        {
            // What a set() that failed partway through leaves behind.
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(br#"{"k"#).unwrap();
        }
        store.set("Y", 2).unwrap();
        drop(store);

        let store = DurableStore::open(dir.path(), true).unwrap();
        assert_eq!(
            store.snapshot(),
            vec![("X".to_string(), 1), ("Y".to_string(), 2)]
        );
    }

    #[test]
    fn corrupt_complete_line_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(DurableStore::path_for_db(dir.path()), "not json\n").unwrap();

        let err = DurableStore::open(dir.path(), true).unwrap_err();
        assert!(matches!(err, TxnKvError::Storage(_)));
    }
}
