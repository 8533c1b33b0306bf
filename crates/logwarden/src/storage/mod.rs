use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::{fmt, fs, str::FromStr};

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::{self as async_fs, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::config::StoreConfig;

mod array_stream;
pub use array_stream::JsonArraySplitter;

pub const MAX_RETAINED: usize = 500;
pub const DEFAULT_READ_CHUNK_BYTES: usize = 8 * 1024;
const EXPORT_CHANNEL_CAPACITY: usize = 16;
const EMPTY_ARRAY: &[u8] = b"[]";

pub fn ensure_data_layout(data_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(data_dir).with_context(|| format!("creating dir {:?}", data_dir))?;
    Ok(())
}

pub fn load_yaml<T: DeserializeOwned>(path: PathBuf) -> anyhow::Result<T> {
    let content = fs::read_to_string(&path).with_context(|| format!("reading yaml {:?}", path))?;
    let parsed =
        serde_yaml::from_str(&content).with_context(|| format!("parsing yaml {:?}", path))?;
    Ok(parsed)
}

pub fn load_yaml_or_default<T: DeserializeOwned + Default>(path: PathBuf) -> anyhow::Result<T> {
    if path.exists() {
        load_yaml(path)
    } else {
        Ok(T::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(anyhow!("unknown log level: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    #[serde(default = "default_status")]
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub status: Option<String>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

fn default_status() -> String {
    "N/A".to_string()
}

/// Inclusive time window used to filter exported entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Build a range from raw query values; unusable values become open bounds.
    pub fn from_query(from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            from: parse_bound(from),
            to: parse_bound(to),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| *instant >= from) && self.to.is_none_or(|to| *instant <= to)
    }
}

pub fn parse_bound(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let value = raw?.trim();
    if value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value.eq_ignore_ascii_case("undefined")
    {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub type ExportStream = ReceiverStream<std::io::Result<Vec<u8>>>;

/// Bounded JSON-array log file with a single in-process writer.
pub struct LogStore {
    path: PathBuf,
    max_retained: usize,
    read_chunk_bytes: usize,
    write_lock: Mutex<()>,
}

impl LogStore {
    pub fn new(path: PathBuf, max_retained: usize) -> Self {
        Self {
            path,
            max_retained: max_retained.max(1),
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(data_dir: &Path, config: &StoreConfig) -> Self {
        Self::new(data_dir.join(&config.file_name), config.max_retained)
            .with_read_chunk_bytes(config.read_chunk_bytes)
    }

    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_retained(&self) -> usize {
        self.max_retained
    }

    /// Best-effort append: failures are logged and never reach the caller.
    pub async fn append(&self, entry: NewLogEntry) {
        if let Err(err) = self.try_append(entry).await {
            warn!(error = ?err, path = %self.path.display(), "failed to append log entry");
        }
    }

    pub async fn try_append(&self, entry: NewLogEntry) -> anyhow::Result<LogEntry> {
        let _guard = self.write_lock.lock().await;

        let record = LogEntry {
            timestamp: format_timestamp(Utc::now()),
            level: entry.level,
            status: entry
                .status
                .filter(|status| !status.trim().is_empty())
                .unwrap_or_else(default_status),
            message: entry.message,
        };

        let mut entries = self.read_history().await?;
        let keep = self.max_retained - 1;
        if entries.len() > keep {
            let excess = entries.len() - keep;
            entries.drain(..excess);
        }
        entries.push(record.clone());

        self.write_atomic(&entries).await?;
        debug!(retained = entries.len(), level = %record.level, "log entry appended");
        Ok(record)
    }

    /// Read every persisted entry. Unlike the append path this fails on a
    /// corrupt file instead of resetting it.
    pub async fn load(&self) -> anyhow::Result<Vec<LogEntry>> {
        let Some(bytes) = self.read_raw().await? else {
            return Ok(Vec::new());
        };
        if is_blank(&bytes) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).with_context(|| format!("parsing log store {:?}", self.path))
    }

    /// Stream the store as a JSON array, filtered to `range` when it has a bound.
    ///
    /// Open failures are returned before any byte is produced. Errors after
    /// that point end the stream with an `Err` item.
    pub async fn export(&self, range: TimeRange) -> anyhow::Result<ExportStream> {
        let (tx, rx) = mpsc::channel(EXPORT_CHANNEL_CAPACITY);

        let file = match File::open(&self.path).await {
            Ok(file) => Some(file),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("opening log store {:?}", self.path));
            }
        };
        let file = match file {
            Some(file) => {
                let metadata = file
                    .metadata()
                    .await
                    .with_context(|| format!("reading metadata for {:?}", self.path))?;
                (metadata.len() > 0).then_some(file)
            }
            None => None,
        };

        let Some(file) = file else {
            let _ = tx.try_send(Ok(EMPTY_ARRAY.to_vec()));
            return Ok(ReceiverStream::new(rx));
        };

        let chunk_bytes = self.read_chunk_bytes;
        if range.is_unbounded() {
            tokio::spawn(pump_raw(file, chunk_bytes, tx));
        } else {
            tokio::spawn(pump_filtered(file, chunk_bytes, range, tx));
        }
        Ok(ReceiverStream::new(rx))
    }

    async fn read_raw(&self) -> anyhow::Result<Option<Vec<u8>>> {
        match async_fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading log store {:?}", self.path)),
        }
    }

    async fn read_history(&self) -> anyhow::Result<Vec<LogEntry>> {
        let Some(bytes) = self.read_raw().await? else {
            return Ok(Vec::new());
        };
        if is_blank(&bytes) {
            return Ok(Vec::new());
        }

        match serde_json::from_slice::<Vec<LogEntry>>(&bytes) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                let quarantine = self.quarantine().await?;
                warn!(
                    error = %err,
                    quarantine = %quarantine.display(),
                    "log store is not a valid entry array; starting a fresh history"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn quarantine(&self) -> anyhow::Result<PathBuf> {
        let mut target = self.path.clone().into_os_string();
        target.push(format!(
            ".corrupt-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ));
        let target = PathBuf::from(target);
        async_fs::rename(&self.path, &target)
            .await
            .with_context(|| format!("moving corrupt log store to {:?}", target))?;
        Ok(target)
    }

    async fn write_atomic(&self, entries: &[LogEntry]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            async_fs::create_dir_all(parent).await?;
        }

        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let serialized = serde_json::to_vec_pretty(entries)?;
        if let Err(err) = write_temp_then_rename(&temp_path, &self.path, &serialized).await {
            if let Err(cleanup) = async_fs::remove_file(&temp_path).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(error = ?cleanup, path = %temp_path.display(), "failed to remove temp log store");
            }
            return Err(err);
        }
        Ok(())
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

async fn write_temp_then_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = File::create(temp_path)
        .await
        .with_context(|| format!("creating {:?}", temp_path))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing {:?}", temp_path))?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    async_fs::rename(temp_path, path)
        .await
        .with_context(|| format!("replacing log store {:?}", path))?;
    Ok(())
}

type ChunkSender = mpsc::Sender<std::io::Result<Vec<u8>>>;

async fn pump_raw<R>(mut reader: R, chunk_bytes: usize, tx: ChunkSender)
where
    R: AsyncRead + Unpin,
{
    // leading whitespace is held back until content shows up, so a blank
    // file still exports as `[]`
    let mut leading: Option<Vec<u8>> = Some(Vec::new());
    loop {
        let mut buf = vec![0u8; chunk_bytes];
        match reader.read(&mut buf).await {
            Ok(0) => {
                if leading.is_some() {
                    let _ = tx.send(Ok(EMPTY_ARRAY.to_vec())).await;
                }
                return;
            }
            Ok(read) => {
                buf.truncate(read);
                if let Some(mut held) = leading.take() {
                    if is_blank(&buf) {
                        held.extend_from_slice(&buf);
                        leading = Some(held);
                        continue;
                    }
                    held.extend_from_slice(&buf);
                    buf = held;
                }
                if tx.send(Ok(buf)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = ?err, "log export read failed");
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

async fn pump_filtered<R>(mut reader: R, chunk_bytes: usize, range: TimeRange, tx: ChunkSender)
where
    R: AsyncRead + Unpin,
{
    if tx.send(Ok(b"[".to_vec())).await.is_err() {
        return;
    }

    let mut splitter = JsonArraySplitter::new();
    let mut buf = vec![0u8; chunk_bytes];
    let mut emitted = 0usize;
    let mut malformed = false;

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                warn!(error = ?err, "log export read failed");
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        let elements = match splitter.feed(&buf[..read]) {
            Ok(elements) => elements,
            Err(err) => {
                warn!(error = ?err, "log store is not a JSON array; closing export early");
                malformed = true;
                break;
            }
        };

        for element in elements {
            if !entry_in_range(&element, &range) {
                continue;
            }
            let mut out = Vec::with_capacity(element.len() + 1);
            if emitted > 0 {
                out.push(b',');
            }
            out.extend_from_slice(&element);
            emitted += 1;
            if tx.send(Ok(out)).await.is_err() {
                return;
            }
        }

        if splitter.is_done() {
            break;
        }
    }

    if !malformed && let Err(err) = splitter.finish() {
        warn!(error = ?err, "log store ended unexpectedly; closing export early");
    }

    let _ = tx.send(Ok(b"]".to_vec())).await;
}

#[derive(Debug, Deserialize)]
struct TimestampField {
    #[serde(default)]
    timestamp: Option<String>,
}

fn entry_in_range(element: &[u8], range: &TimeRange) -> bool {
    match serde_json::from_slice::<TimestampField>(element) {
        Ok(TimestampField {
            timestamp: Some(timestamp),
        }) => DateTime::parse_from_rfc3339(&timestamp)
            .map(|parsed| range.contains(&parsed.with_timezone(&Utc)))
            .unwrap_or(false),
        Ok(_) => false,
        Err(err) => {
            debug!(error = %err, "skipping unreadable log element");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_stream::StreamExt;

    async fn collect_export(store: &LogStore, range: TimeRange) -> Vec<u8> {
        let mut stream = store.export(range).await.expect("export should open");
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.expect("chunk should be readable"));
        }
        body
    }

    async fn export_values(store: &LogStore, range: TimeRange) -> Vec<serde_json::Value> {
        let body = collect_export(store, range).await;
        serde_json::from_slice(&body).expect("export should be a JSON array")
    }

    fn entry_at(timestamp: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: timestamp.to_string(),
            level: LogLevel::Info,
            status: "200".to_string(),
            message: message.to_string(),
        }
    }

    fn write_fixture(path: &Path, entries: &[LogEntry]) {
        std::fs::write(path, serde_json::to_vec_pretty(entries).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn append_caps_retention_and_drops_oldest() {
        let temp = tempdir().unwrap();
        let store = LogStore::new(temp.path().join("logs.json"), 5);

        for idx in 0..8 {
            store
                .try_append(NewLogEntry::new(LogLevel::Info, format!("entry {idx}")))
                .await
                .unwrap();
            let entries = store.load().await.unwrap();
            assert_eq!(entries.len(), std::cmp::min(idx + 1, 5));
        }

        let messages: Vec<String> = store
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(
            messages,
            vec!["entry 3", "entry 4", "entry 5", "entry 6", "entry 7"]
        );
    }

    #[tokio::test]
    async fn default_cap_holds_five_hundred_entries() {
        let temp = tempdir().unwrap();
        let store = LogStore::new(temp.path().join("logs.json"), MAX_RETAINED);

        for idx in 0..(MAX_RETAINED + 3) {
            store
                .try_append(NewLogEntry::new(LogLevel::Warn, format!("entry {idx}")))
                .await
                .unwrap();
        }

        let entries = store.load().await.unwrap();
        assert_eq!(entries.len(), MAX_RETAINED);
        assert_eq!(entries[0].message, "entry 3");
        assert_eq!(
            entries.last().unwrap().message,
            format!("entry {}", MAX_RETAINED + 2)
        );
    }

    #[tokio::test]
    async fn append_preserves_order_and_stamps_monotonic_times() {
        let temp = tempdir().unwrap();
        let store = LogStore::new(temp.path().join("logs.json"), 50);

        for idx in 0..10 {
            store
                .append(NewLogEntry::new(LogLevel::Error, format!("step {idx}")).with_status("500"))
                .await;
        }

        let entries = store.load().await.unwrap();
        for (idx, entry) in entries.iter().enumerate() {
            assert_eq!(entry.message, format!("step {idx}"));
            assert_eq!(entry.status, "500");
        }
        let stamps: Vec<DateTime<Utc>> = entries
            .iter()
            .map(|entry| DateTime::parse_from_rfc3339(&entry.timestamp).unwrap().with_timezone(&Utc))
            .collect();
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(entries[0].timestamp.ends_with('Z'));
        assert_eq!(entries[0].timestamp.len(), "2025-01-01T00:00:00.000Z".len());
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let temp = tempdir().unwrap();
        let store = std::sync::Arc::new(LogStore::new(temp.path().join("logs.json"), 100));

        let mut handles = Vec::new();
        for idx in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_append(NewLogEntry::new(LogLevel::Info, format!("writer {idx}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn round_trip_last_entry_matches_append() {
        let temp = tempdir().unwrap();
        let store = LogStore::new(temp.path().join("logs.json"), MAX_RETAINED);
        store
            .try_append(NewLogEntry::new(LogLevel::Info, "first"))
            .await
            .unwrap();
        let written = store
            .try_append(NewLogEntry::new(LogLevel::Error, "disk full").with_status("507"))
            .await
            .unwrap();

        let values = export_values(&store, TimeRange::unbounded()).await;
        let last: LogEntry = serde_json::from_value(values.last().unwrap().clone()).unwrap();
        assert_eq!(last, written);
        assert_eq!(last.status, "507");
        assert_eq!(last.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn missing_status_defaults_to_na() {
        let temp = tempdir().unwrap();
        let store = LogStore::new(temp.path().join("logs.json"), 10);
        let written = store
            .try_append(NewLogEntry::new(LogLevel::Info, "ok").with_status("  "))
            .await
            .unwrap();
        assert_eq!(written.status, "N/A");
    }

    #[tokio::test]
    async fn unbounded_export_is_byte_identical() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        let raw = b"[ {\"timestamp\":\"2025-01-01T00:00:00.000Z\",\"level\":\"INFO\",\"message\":\"x\"} ]\n";
        std::fs::write(&path, raw).unwrap();

        let store = LogStore::new(path, MAX_RETAINED).with_read_chunk_bytes(7);
        assert_eq!(collect_export(&store, TimeRange::unbounded()).await, raw);
    }

    #[tokio::test]
    async fn range_filter_is_inclusive() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        let t1 = "2025-03-01T10:00:00.000Z";
        let t2 = "2025-03-01T11:00:00.000Z";
        let t3 = "2025-03-01T12:00:00.000Z";
        write_fixture(
            &path,
            &[entry_at(t1, "one"), entry_at(t2, "two"), entry_at(t3, "three")],
        );
        let store = LogStore::new(path, MAX_RETAINED).with_read_chunk_bytes(5);

        let messages = |values: Vec<serde_json::Value>| -> Vec<String> {
            values
                .into_iter()
                .map(|value| value["message"].as_str().unwrap().to_string())
                .collect()
        };

        let from_t2 = export_values(&store, TimeRange::from_query(Some(t2), None)).await;
        assert_eq!(messages(from_t2), vec!["two", "three"]);

        let to_t2 = export_values(&store, TimeRange::from_query(None, Some(t2))).await;
        assert_eq!(messages(to_t2), vec!["one", "two"]);

        let only_t2 = export_values(&store, TimeRange::from_query(Some(t2), Some(t2))).await;
        assert_eq!(messages(only_t2), vec!["two"]);

        let none = export_values(
            &store,
            TimeRange::from_query(Some("2026-01-01T00:00:00Z"), None),
        )
        .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn filter_compares_instants_across_offsets() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        write_fixture(
            &path,
            &[
                entry_at("2025-03-01T10:00:00.000Z", "early"),
                entry_at("2025-03-01T12:30:00+02:00", "offset"),
            ],
        );
        let store = LogStore::new(path, MAX_RETAINED);

        let values = export_values(
            &store,
            TimeRange::from_query(Some("2025-03-01T10:15:00Z"), None),
        )
        .await;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["message"], "offset");
    }

    #[tokio::test]
    async fn entries_without_timestamp_are_excluded_when_filtering() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        std::fs::write(
            &path,
            r#"[{"message":"no stamp"},{"timestamp":"garbage","message":"bad"},{"timestamp":"2025-01-02T00:00:00.000Z","level":"INFO","message":"kept"}]"#,
        )
        .unwrap();
        let store = LogStore::new(path, MAX_RETAINED);

        let values = export_values(&store, TimeRange::from_query(Some("2025-01-01"), None)).await;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["message"], "kept");
    }

    #[tokio::test]
    async fn filtered_export_stops_at_the_closing_bracket() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        let mut raw = serde_json::to_vec(&[
            entry_at("2025-01-01T00:00:00.000Z", "a"),
            entry_at("2025-01-02T00:00:00.000Z", "b"),
        ])
        .unwrap();
        raw.extend_from_slice(b"\n\n\n\n\n\n\n\ntrailing bytes the export never reads");
        std::fs::write(&path, raw).unwrap();
        let store = LogStore::new(path, MAX_RETAINED).with_read_chunk_bytes(4);

        let values = export_values(&store, TimeRange::from_query(Some("2025-01-01"), None)).await;
        let messages: Vec<_> = values.iter().map(|v| v["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn invalid_bounds_behave_like_absent_bounds() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        write_fixture(
            &path,
            &[
                entry_at("2025-01-01T00:00:00.000Z", "a"),
                entry_at("2025-01-02T00:00:00.000Z", "b"),
            ],
        );
        let store = LogStore::new(path, MAX_RETAINED);
        let baseline = collect_export(&store, TimeRange::unbounded()).await;

        for raw in ["undefined", "null", "", "not-a-date"] {
            let range = TimeRange::from_query(Some(raw), Some(raw));
            assert!(range.is_unbounded(), "{raw} should be ignored");
            assert_eq!(collect_export(&store, range).await, baseline);
        }
    }

    #[tokio::test]
    async fn empty_or_missing_store_exports_empty_array() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        let store = LogStore::new(path.clone(), MAX_RETAINED);

        assert_eq!(collect_export(&store, TimeRange::unbounded()).await, b"[]");
        assert_eq!(
            collect_export(&store, TimeRange::from_query(Some("2025-01-01"), None)).await,
            b"[]"
        );

        std::fs::write(&path, b"").unwrap();
        assert_eq!(collect_export(&store, TimeRange::unbounded()).await, b"[]");
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_temp_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        // a non-empty directory at the store path makes the final rename fail
        std::fs::create_dir_all(path.join("occupied")).unwrap();
        let store = LogStore::new(path.clone(), MAX_RETAINED);

        let err = store
            .write_atomic(&[entry_at("2025-01-01T00:00:00.000Z", "lost")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("replacing log store"));
        assert!(!temp.path().join("logs.json.tmp").exists());
        assert!(path.join("occupied").exists());
    }

    #[tokio::test]
    async fn whitespace_only_store_exports_empty_array() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        let store = LogStore::new(path.clone(), MAX_RETAINED).with_read_chunk_bytes(2);

        for blank in [&b"\n"[..], b"  \n\t \n"] {
            std::fs::write(&path, blank).unwrap();
            assert!(store.load().await.unwrap().is_empty());
            assert_eq!(collect_export(&store, TimeRange::unbounded()).await, b"[]");
            assert_eq!(
                export_values(&store, TimeRange::from_query(Some("2025-01-01"), None)).await,
                Vec::<serde_json::Value>::new()
            );
        }

        // leading whitespace before real content is still passed through untouched
        let raw = b"\n\n  [{\"timestamp\":\"2025-01-01T00:00:00.000Z\",\"level\":\"INFO\",\"message\":\"m\"}]\n";
        std::fs::write(&path, raw).unwrap();
        assert_eq!(collect_export(&store, TimeRange::unbounded()).await, raw.to_vec());
    }

    #[tokio::test]
    async fn corrupt_store_is_quarantined_on_append() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = LogStore::new(path.clone(), MAX_RETAINED);

        assert!(store.load().await.is_err());

        store
            .try_append(NewLogEntry::new(LogLevel::Warn, "after corruption"))
            .await
            .unwrap();

        let entries = store.load().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "after corruption");

        let quarantined: Vec<PathBuf> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("logs.json.corrupt-"))
            })
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(std::fs::read(&quarantined[0]).unwrap(), b"{ not json");
    }

    #[tokio::test]
    async fn filtered_export_of_corrupt_store_is_still_an_array() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs.json");
        std::fs::write(
            &path,
            r#"[{"timestamp":"2025-01-02T00:00:00.000Z","message":"kept"},{"timestamp":"#,
        )
        .unwrap();
        let store = LogStore::new(path, MAX_RETAINED);

        let values = export_values(&store, TimeRange::from_query(Some("2025-01-01"), None)).await;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["message"], "kept");
    }

    #[test]
    fn parse_bound_accepts_common_shapes() {
        let expected = DateTime::parse_from_rfc3339("2025-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_bound(Some("2025-05-01T00:00:00Z")), Some(expected));
        assert_eq!(parse_bound(Some("2025-05-01T00:00:00")), Some(expected));
        assert_eq!(parse_bound(Some("2025-05-01")), Some(expected));
        assert_eq!(parse_bound(Some(" null ")), None);
        assert_eq!(parse_bound(Some("Undefined")), None);
        assert_eq!(parse_bound(None), None);
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("ERROR".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("debug".parse::<LogLevel>().is_err());
    }
}
