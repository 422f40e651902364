use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use cairn_types::{LogEntry, Seq, StreamOptions, Watchable, NO_SEQ};

use crate::error::{LogError, LogResult};
use crate::tail::{stream_entries, EntrySource};
use crate::traits::{Log, LogStream};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: u64 = 8;

/// Flush/sync strategy for appends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Flush to the OS and rely on its page cache.
    #[default]
    OsDefault,
}

/// Configuration for a [`FileLog`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    pub sync_mode: SyncMode,
    /// Number of decoded entries kept in the read cache. `0` disables it.
    pub cache_capacity: usize,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            cache_capacity: 1024,
        }
    }
}

/// Durable append-only log stored in a single file.
///
/// On-disk format, one record per entry:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON-encoded LogEntry)]
/// ```
///
/// Opening the file rebuilds the seq index. Records failing the CRC check
/// are skipped, so recovered seqs may be sparse. A torn record at the tail
/// is cut off before new appends are accepted.
pub struct FileLog {
    state: Arc<FileState>,
    since: Watchable<Option<Seq>>,
}

struct FileState {
    path: PathBuf,
    config: FileLogConfig,
    writer: Mutex<FileWriter>,
    /// seq -> byte offset of its record.
    index: RwLock<BTreeMap<Seq, u64>>,
    cache: Mutex<ReadCache>,
}

struct FileWriter {
    writer: BufWriter<File>,
    offset: u64,
    last_seq: Seq,
}

impl FileLog {
    /// Open (or create) the log file at `path`.
    pub fn open(path: impl AsRef<Path>, config: FileLogConfig) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let (index, valid_len) = recover_index(&path)?;

        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "discarding torn tail of log file"
            );
            file.set_len(valid_len)?;
        }

        let last_seq = index.keys().next_back().copied().unwrap_or(NO_SEQ);
        info!(path = %path.display(), entries = index.len(), since = last_seq, "file log opened");

        let state = FileState {
            path,
            cache: Mutex::new(ReadCache::new(config.cache_capacity)),
            config,
            writer: Mutex::new(FileWriter {
                writer: BufWriter::new(file),
                offset: valid_len,
                last_seq,
            }),
            index: RwLock::new(index),
        };

        Ok(Self {
            state: Arc::new(state),
            since: Watchable::new(Some(last_seq)),
        })
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Number of recovered and appended entries.
    pub fn len(&self) -> usize {
        self.state.index.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries currently held by the read cache.
    pub fn cached_entries(&self) -> usize {
        self.state.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl FileState {
    fn offset_of(&self, seq: Seq) -> LogResult<Option<u64>> {
        let index = self.index.read().map_err(|_| LogError::LockPoisoned)?;
        Ok(index.get(&seq).copied())
    }

    fn read_entry(&self, seq: Seq, offset: u64, cache: bool) -> LogResult<LogEntry> {
        if cache {
            let cached = self.cache.lock().map_err(|_| LogError::LockPoisoned)?.get(seq);
            if let Some(value) = cached {
                return Ok(LogEntry::new(seq, value));
            }
        }

        let mut reader = BufReader::new(File::open(&self.path)?);
        let entry = read_record(&mut reader, offset)?;
        if entry.seq != seq {
            return Err(LogError::Corrupt {
                offset,
                reason: format!("expected seq {seq}, found {}", entry.seq),
            });
        }

        if cache {
            self.cache
                .lock()
                .map_err(|_| LogError::LockPoisoned)?
                .insert(seq, entry.value.clone());
        }
        Ok(entry)
    }
}

impl EntrySource for FileState {
    fn next_after(&self, after: Seq, cache: bool) -> LogResult<Option<LogEntry>> {
        let next = {
            let index = self.index.read().map_err(|_| LogError::LockPoisoned)?;
            index
                .range((Bound::Excluded(after), Bound::Unbounded))
                .next()
                .map(|(seq, offset)| (*seq, *offset))
        };
        match next {
            Some((seq, offset)) => self.read_entry(seq, offset, cache).map(Some),
            None => Ok(None),
        }
    }
}

impl FileWriter {
    fn write_record(&mut self, record: &[u8], sync_mode: &SyncMode) -> io::Result<()> {
        self.writer.write_all(record)?;
        self.writer.flush()?;
        if *sync_mode == SyncMode::EveryWrite {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Drop any buffered bytes and cut the file back to `offset`, the end
    /// of the last complete record.
    fn rollback(&mut self, offset: u64) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it on drop.
        let (_, _unwritten) = stale.into_parts();
        self.writer.get_ref().set_len(offset)?;
        self.offset = offset;
        Ok(())
    }
}

#[async_trait]
impl Log for FileLog {
    fn since(&self) -> &Watchable<Option<Seq>> {
        &self.since
    }

    async fn append(&self, value: Value) -> LogResult<Seq> {
        let mut w = self
            .state
            .writer
            .lock()
            .map_err(|_| LogError::LockPoisoned)?;

        let entry = LogEntry::new(w.last_seq + 1, value);
        let payload = serde_json::to_vec(&entry)?;
        let length = u32::try_from(payload.len())
            .map_err(|_| LogError::Serialization("entry exceeds 4 GiB".into()))?;
        let crc = crc32fast::hash(&payload);
        let record_offset = w.offset;

        let mut record = Vec::with_capacity(HEADER_SIZE as usize + payload.len());
        record.extend_from_slice(&length.to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(&payload);
        if let Err(e) = w.write_record(&record, &self.state.config.sync_mode) {
            warn!(offset = record_offset, error = %e, "file log append failed, rolling back");
            w.rollback(record_offset)?;
            return Err(e.into());
        }

        w.offset += HEADER_SIZE + payload.len() as u64;
        w.last_seq = entry.seq;
        self.state
            .index
            .write()
            .map_err(|_| LogError::LockPoisoned)?
            .insert(entry.seq, record_offset);
        // Published while the writer lock is held so the watermark advances
        // in append order.
        self.since.set(Some(entry.seq));

        debug!(seq = entry.seq, offset = record_offset, len = payload.len(), "file log append");
        Ok(entry.seq)
    }

    async fn get(&self, seq: Seq) -> LogResult<Value> {
        let offset = self.state.offset_of(seq)?.ok_or(LogError::NotFound(seq))?;
        Ok(self.state.read_entry(seq, offset, true)?.value)
    }

    fn stream(&self, opts: StreamOptions) -> LogStream {
        stream_entries(Arc::clone(&self.state), &self.since, opts)
    }

    fn filename(&self) -> Option<&Path> {
        Some(&self.state.path)
    }
}

/// Bounded cache of decoded values; evicts the lowest seq when full.
struct ReadCache {
    capacity: usize,
    values: BTreeMap<Seq, Value>,
}

impl ReadCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: BTreeMap::new(),
        }
    }

    fn get(&self, seq: Seq) -> Option<Value> {
        self.values.get(&seq).cloned()
    }

    fn insert(&mut self, seq: Seq, value: Value) {
        if self.capacity == 0 {
            return;
        }
        while self.values.len() >= self.capacity {
            if self.values.pop_first().is_none() {
                break;
            }
        }
        self.values.insert(seq, value);
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

fn read_header<R: Read>(reader: &mut R) -> io::Result<(u32, u32)> {
    let mut header = [0u8; HEADER_SIZE as usize];
    reader.read_exact(&mut header)?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Ok((length, crc))
}

fn read_record<R: Read + Seek>(reader: &mut R, offset: u64) -> LogResult<LogEntry> {
    reader.seek(SeekFrom::Start(offset))?;
    let (length, expected_crc) = read_header(reader)?;
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;

    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(LogError::Corrupt {
            offset,
            reason: format!("CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
        });
    }
    Ok(serde_json::from_slice(&payload)?)
}

/// Scan the file front-to-back, returning the seq index and the length of
/// the well-formed prefix.
fn recover_index(path: &Path) -> LogResult<(BTreeMap<Seq, u64>, u64)> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut index = BTreeMap::new();
    let mut last_seq = NO_SEQ;
    let mut offset = 0u64;

    while offset + HEADER_SIZE <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let (length, expected_crc) = match read_header(&mut file) {
            Ok(header) => header,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let end = offset + HEADER_SIZE + length as u64;
        if length == 0 || end > file_len {
            warn!(offset, length, file_len, "invalid record length; stopping recovery");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated record; stopping recovery");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping record");
            offset = end;
            continue;
        }

        match serde_json::from_slice::<LogEntry>(&payload) {
            Ok(entry) if entry.seq > last_seq => {
                index.insert(entry.seq, offset);
                last_seq = entry.seq;
            }
            Ok(entry) => {
                warn!(offset, seq = entry.seq, last_seq, "out-of-order record; skipping");
            }
            Err(e) => {
                warn!(offset, error = %e, "failed to decode record; skipping");
            }
        }
        offset = end;
    }

    debug!(recovered = index.len(), valid_len = offset, "log recovery complete");
    Ok((index, offset))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    fn temp_log() -> (tempfile::TempDir, FileLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::open(dir.path().join("log.cairn"), FileLogConfig::default()).unwrap();
        (dir, log)
    }

    #[tokio::test]
    async fn append_and_reopen() {
        let (dir, log) = temp_log();
        assert_eq!(log.since().value(), Some(NO_SEQ));
        assert_eq!(log.append(json!({"n": 1})).await.unwrap(), 0);
        assert_eq!(log.append(json!({"n": 2})).await.unwrap(), 1);
        drop(log);

        let log = FileLog::open(dir.path().join("log.cairn"), FileLogConfig::default()).unwrap();
        assert_eq!(log.since().value(), Some(1));
        assert_eq!(log.get(0).await.unwrap(), json!({"n": 1}));
        assert_eq!(log.append(json!({"n": 3})).await.unwrap(), 2);
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn failed_write_is_rolled_back() {
        let (dir, log) = temp_log();
        log.append(json!("kept")).await.unwrap();
        {
            let mut w = log.state.writer.lock().unwrap();
            let offset = w.offset;
            // A half-written record, part on disk and part still buffered.
            w.writer.write_all(&[7u8; 5]).unwrap();
            w.writer.flush().unwrap();
            w.writer.write_all(&[9u8; 3]).unwrap();
            w.rollback(offset).unwrap();
            assert_eq!(w.writer.get_ref().metadata().unwrap().len(), offset);
        }

        assert_eq!(log.append(json!("next")).await.unwrap(), 1);
        assert_eq!(log.get(1).await.unwrap(), json!("next"));
        drop(log);

        let log = FileLog::open(dir.path().join("log.cairn"), FileLogConfig::default()).unwrap();
        assert_eq!(log.since().value(), Some(1));
        assert_eq!(log.get(0).await.unwrap(), json!("kept"));
        assert_eq!(log.get(1).await.unwrap(), json!("next"));
    }

    #[tokio::test]
    async fn get_missing_seq_fails() {
        let (_dir, log) = temp_log();
        assert!(matches!(log.get(0).await, Err(LogError::NotFound(0))));
    }

    #[tokio::test]
    async fn crc_mismatch_leaves_a_gap() {
        let (dir, log) = temp_log();
        log.append(json!("first")).await.unwrap();
        log.append(json!("second")).await.unwrap();
        let path = log.path().to_path_buf();
        drop(log);

        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE + 2)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE + 2)).unwrap();
            file.write_all(&buf).unwrap();
            file.sync_all().unwrap();
        }

        let log = FileLog::open(dir.path().join("log.cairn"), FileLogConfig::default()).unwrap();
        assert_eq!(log.since().value(), Some(1));
        assert!(matches!(log.get(0).await, Err(LogError::NotFound(0))));

        let items: Vec<_> = log
            .stream(StreamOptions::default())
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].seq(), Some(1));
    }

    #[tokio::test]
    async fn torn_tail_is_discarded_before_appending() {
        let (dir, log) = temp_log();
        log.append(json!("kept")).await.unwrap();
        log.append(json!("torn")).await.unwrap();
        let path = log.path().to_path_buf();
        drop(log);

        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        let log = FileLog::open(&path, FileLogConfig::default()).unwrap();
        assert_eq!(log.since().value(), Some(0));
        assert_eq!(log.append(json!("next")).await.unwrap(), 1);
        drop(log);

        let log = FileLog::open(dir.path().join("log.cairn"), FileLogConfig::default()).unwrap();
        assert_eq!(log.get(1).await.unwrap(), json!("next"));
    }

    #[tokio::test]
    async fn uncached_streams_do_not_fill_cache() {
        let (_dir, log) = temp_log();
        for i in 0..5 {
            log.append(json!(i)).await.unwrap();
        }
        let cold: Vec<_> = log.stream(StreamOptions::default().cache(false)).collect().await;
        assert_eq!(cold.len(), 5);
        assert_eq!(log.cached_entries(), 0);

        let warm: Vec<_> = log.stream(StreamOptions::default()).collect().await;
        assert_eq!(warm.len(), 5);
        assert_eq!(log.cached_entries(), 5);
    }

    #[test]
    fn read_cache_evicts_lowest_seq() {
        let mut cache = ReadCache::new(2);
        cache.insert(1, json!(1));
        cache.insert(2, json!(2));
        cache.insert(3, json!(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.get(3), Some(json!(3)));
    }

    #[tokio::test]
    async fn every_write_sync_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileLogConfig {
            sync_mode: SyncMode::EveryWrite,
            ..FileLogConfig::default()
        };
        let log = FileLog::open(dir.path().join("sync.cairn"), config).unwrap();
        log.append(json!("durable")).await.unwrap();
        assert_eq!(log.filename(), Some(dir.path().join("sync.cairn").as_path()));
    }
}
