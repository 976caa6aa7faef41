//! Local storage implementation.
//!
//! Keeps every collection in memory behind one async mutex. When opened on a
//! directory, each mutation is flushed to that directory: snapshot files are
//! written atomically (temp file, then rename) and the history log is
//! appended as JSON lines.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{CourseRecord, ExpiredRecord, HistoryEntry, ScrapedUrlMapping};
use crate::storage::{CatalogStore, ExpiredStore, HistoryLog, ResolutionCache, RoundStateStore};

const CATALOG_FILE: &str = "catalog.json";
const EXPIRED_FILE: &str = "expired.json";
const MAPPINGS_FILE: &str = "mappings.json";
const HISTORY_FILE: &str = "history.jsonl";
const ROUND_STATE_FILE: &str = "round_state.json";

#[derive(Debug, Default)]
struct State {
    catalog: HashMap<i64, CourseRecord>,
    expired: HashMap<String, ExpiredRecord>,
    mappings: HashMap<String, ScrapedUrlMapping>,
    history: Vec<HistoryEntry>,
    last_round: Option<i64>,
}

#[derive(Debug, Serialize, serde::Deserialize)]
struct RoundStateFile {
    last_round_epoch_millis: i64,
}

/// Local storage backend for every collaborator store.
pub struct LocalStorage {
    root_dir: Option<PathBuf>,
    state: Mutex<State>,
}

impl LocalStorage {
    /// Storage that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            root_dir: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Open (or create) file-backed storage rooted at `root_dir`.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        tokio::fs::create_dir_all(&root_dir).await?;

        let catalog: Vec<CourseRecord> = read_json(&root_dir.join(CATALOG_FILE))
            .await?
            .unwrap_or_default();
        let expired: Vec<ExpiredRecord> = read_json(&root_dir.join(EXPIRED_FILE))
            .await?
            .unwrap_or_default();
        let mappings: Vec<ScrapedUrlMapping> = read_json(&root_dir.join(MAPPINGS_FILE))
            .await?
            .unwrap_or_default();
        let round_state: Option<RoundStateFile> =
            read_json(&root_dir.join(ROUND_STATE_FILE)).await?;

        log::info!(
            "Opened storage at {}: {} active, {} expired, {} cached mappings",
            root_dir.display(),
            catalog.len(),
            expired.len(),
            mappings.len()
        );

        let state = State {
            catalog: catalog.into_iter().map(|r| (r.course_id, r)).collect(),
            expired: expired
                .into_iter()
                .map(|r| (r.coupon_url.clone(), r))
                .collect(),
            mappings: mappings
                .into_iter()
                .map(|m| (m.scraped_url.clone(), m))
                .collect(),
            history: Vec::new(),
            last_round: round_state.map(|s| s.last_round_epoch_millis),
        };

        Ok(Self {
            root_dir: Some(root_dir),
            state: Mutex::new(state),
        })
    }

    /// Number of active coupons.
    pub async fn catalog_len(&self) -> usize {
        self.state.lock().await.catalog.len()
    }

    /// Number of expired coupon URLs.
    pub async fn expired_len(&self) -> usize {
        self.state.lock().await.expired.len()
    }

    /// All history entries recorded so far.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let Some(root) = &self.root_dir else {
            return Ok(self.state.lock().await.history.clone());
        };
        let path = root.join(HISTORY_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(AppError::from))
            .collect()
    }

    async fn flush_catalog(&self, state: &State) -> Result<()> {
        let Some(root) = &self.root_dir else {
            return Ok(());
        };
        let mut records: Vec<&CourseRecord> = state.catalog.values().collect();
        records.sort_by_key(|r| r.course_id);
        write_json(&root.join(CATALOG_FILE), &records).await
    }

    async fn flush_expired(&self, state: &State) -> Result<()> {
        let Some(root) = &self.root_dir else {
            return Ok(());
        };
        let mut records: Vec<&ExpiredRecord> = state.expired.values().collect();
        records.sort_by(|a, b| a.coupon_url.cmp(&b.coupon_url));
        write_json(&root.join(EXPIRED_FILE), &records).await
    }

    async fn flush_mappings(&self, state: &State) -> Result<()> {
        let Some(root) = &self.root_dir else {
            return Ok(());
        };
        let mut mappings: Vec<&ScrapedUrlMapping> = state.mappings.values().collect();
        mappings.sort_by(|a, b| a.scraped_url.cmp(&b.scraped_url));
        write_json(&root.join(MAPPINGS_FILE), &mappings).await
    }
}

/// Write bytes atomically (write to temp, then rename).
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &bytes).await
}

/// Read JSON data, returning None if the file doesn't exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

#[async_trait]
impl CatalogStore for LocalStorage {
    async fn find_by_id(&self, course_id: i64) -> Result<Option<CourseRecord>> {
        Ok(self.state.lock().await.catalog.get(&course_id).cloned())
    }

    async fn find_by_url(&self, coupon_url: &str) -> Result<Option<CourseRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .catalog
            .values()
            .find(|r| r.coupon_url == coupon_url)
            .cloned())
    }

    async fn upsert(&self, mut record: CourseRecord) -> Result<()> {
        let mut state = self.state.lock().await;

        // One row per URL: a URL now resolving to another course replaces the old row.
        state
            .catalog
            .retain(|id, r| *id == record.course_id || r.coupon_url != record.coupon_url);

        if let Some(existing) = state.catalog.get(&record.course_id) {
            record.created_at = existing.created_at;
        }
        state.catalog.insert(record.course_id, record);
        self.flush_catalog(&state).await
    }

    async fn delete_by_url(&self, coupon_url: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.catalog.len();
        state.catalog.retain(|_, r| r.coupon_url != coupon_url);
        if state.catalog.len() == before {
            return Ok(());
        }
        self.flush_catalog(&state).await
    }

    async fn all_urls(&self) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(state
            .catalog
            .values()
            .map(|r| r.coupon_url.clone())
            .collect())
    }

    async fn urls_needing_refresh(
        &self,
        expiry_threshold: DateTime<Utc>,
        min_uses_remaining: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(state
            .catalog
            .values()
            .filter(|r| r.needs_refresh(expiry_threshold, min_uses_remaining, stale_before))
            .map(|r| r.coupon_url.clone())
            .collect())
    }
}

#[async_trait]
impl ExpiredStore for LocalStorage {
    async fn find_by_url(&self, coupon_url: &str) -> Result<Option<ExpiredRecord>> {
        Ok(self.state.lock().await.expired.get(coupon_url).cloned())
    }

    async fn upsert(&self, record: ExpiredRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.expired.insert(record.coupon_url.clone(), record);
        self.flush_expired(&state).await
    }

    async fn delete_by_url(&self, coupon_url: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.expired.remove(coupon_url).is_none() {
            return Ok(());
        }
        self.flush_expired(&state).await
    }

    async fn recently_confirmed_expired_urls(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(state
            .expired
            .values()
            .filter(|r| r.updated_at > since)
            .map(|r| r.coupon_url.clone())
            .collect())
    }

    async fn touch_updated_at(&self, coupon_urls: &HashSet<String>) -> Result<()> {
        if coupon_urls.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut state = self.state.lock().await;
        for url in coupon_urls {
            if let Some(record) = state.expired.get_mut(url) {
                record.updated_at = now;
            }
        }
        self.flush_expired(&state).await
    }
}

#[async_trait]
impl ResolutionCache for LocalStorage {
    async fn find_by_scraped_url(&self, scraped_url: &str) -> Result<Option<ScrapedUrlMapping>> {
        Ok(self.state.lock().await.mappings.get(scraped_url).cloned())
    }

    async fn save(&self, mapping: ScrapedUrlMapping) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.mappings.contains_key(&mapping.scraped_url) {
            return Ok(());
        }
        state.mappings.insert(mapping.scraped_url.clone(), mapping);
        self.flush_mappings(&state).await
    }
}

#[async_trait]
impl HistoryLog for LocalStorage {
    async fn append_all(&self, entries: Vec<HistoryEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let Some(root) = &self.root_dir else {
            self.state.lock().await.history.extend(entries);
            return Ok(());
        };

        let mut buffer = Vec::new();
        for entry in &entries {
            serde_json::to_writer(&mut buffer, entry)?;
            buffer.push(b'\n');
        }

        // Hold the lock so concurrent appends don't interleave.
        let _state = self.state.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(root.join(HISTORY_FILE))
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RoundStateStore for LocalStorage {
    async fn load_last_round(&self) -> Result<Option<i64>> {
        Ok(self.state.lock().await.last_round)
    }

    async fn save_last_round(&self, epoch_millis: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.last_round = Some(epoch_millis);
        if let Some(root) = &self.root_dir {
            let file = RoundStateFile {
                last_round_epoch_millis: epoch_millis,
            };
            write_json(&root.join(ROUND_STATE_FILE), &file).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;
    use crate::models::{HistoryStatus, fixtures::record};

    #[tokio::test]
    async fn test_catalog_upsert_keeps_created_at() {
        let storage = LocalStorage::in_memory();
        let mut first = record(1, "https://www.udemy.com/course/a/?couponCode=A");
        first.created_at = Utc::now() - Duration::days(10);
        let created = first.created_at;
        CatalogStore::upsert(&storage, first).await.unwrap();

        let mut second = record(1, "https://www.udemy.com/course/a/?couponCode=B");
        second.title = "Renamed".to_string();
        CatalogStore::upsert(&storage, second).await.unwrap();

        let stored = storage.find_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.created_at, created);
        assert_eq!(stored.title, "Renamed");
        assert_eq!(storage.catalog_len().await, 1);
    }

    #[tokio::test]
    async fn test_catalog_url_moves_to_new_course() {
        let storage = LocalStorage::in_memory();
        let url = "https://www.udemy.com/course/a/?couponCode=A";
        CatalogStore::upsert(&storage, record(1, url)).await.unwrap();
        CatalogStore::upsert(&storage, record(2, url)).await.unwrap();

        assert_eq!(storage.catalog_len().await, 1);
        let found = CatalogStore::find_by_url(&storage, url).await.unwrap().unwrap();
        assert_eq!(found.course_id, 2);
    }

    #[tokio::test]
    async fn test_urls_needing_refresh() {
        let storage = LocalStorage::in_memory();
        let now = Utc::now();

        let fresh = record(1, "https://u/fresh");
        let mut expiring = record(2, "https://u/expiring");
        expiring.expires_at = now + Duration::minutes(10);
        let mut low_uses = record(3, "https://u/low");
        low_uses.uses_remaining = 3;
        let mut stale = record(4, "https://u/stale");
        stale.updated_at = now - Duration::hours(5);

        for r in [fresh, expiring, low_uses, stale] {
            CatalogStore::upsert(&storage, r).await.unwrap();
        }

        let due = storage
            .urls_needing_refresh(now + Duration::hours(2), 50, now - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(due.len(), 3);
        assert!(!due.contains("https://u/fresh"));
    }

    #[tokio::test]
    async fn test_recently_confirmed_window_is_strict() {
        let storage = LocalStorage::in_memory();
        let confirmed_at = Utc::now() - Duration::hours(3);
        let mut expired = ExpiredRecord::new("https://u/dead", None, None);
        expired.updated_at = confirmed_at;
        ExpiredStore::upsert(&storage, expired).await.unwrap();

        let window = Duration::hours(12);
        // Before confirmed_at + window: still skipped.
        let now = confirmed_at + window - Duration::seconds(1);
        let recent = storage
            .recently_confirmed_expired_urls(now - window)
            .await
            .unwrap();
        assert!(recent.contains("https://u/dead"));

        // At exactly confirmed_at + window: eligible again.
        let now = confirmed_at + window;
        let recent = storage
            .recently_confirmed_expired_urls(now - window)
            .await
            .unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn test_touch_updated_at() {
        let storage = LocalStorage::in_memory();
        let mut expired = ExpiredRecord::new("https://u/dead", Some(5), None);
        expired.updated_at = Utc::now() - Duration::days(2);
        ExpiredStore::upsert(&storage, expired).await.unwrap();

        let urls: HashSet<String> = ["https://u/dead".to_string()].into();
        storage.touch_updated_at(&urls).await.unwrap();

        let touched = ExpiredStore::find_by_url(&storage, "https://u/dead")
            .await
            .unwrap()
            .unwrap();
        assert!(touched.updated_at > Utc::now() - Duration::minutes(1));
        assert!(touched.created_at < touched.updated_at);
    }

    #[tokio::test]
    async fn test_mapping_is_write_once() {
        let storage = LocalStorage::in_memory();
        storage
            .save(ScrapedUrlMapping::new("https://s/1", "https://u/1", "enext"))
            .await
            .unwrap();
        storage
            .save(ScrapedUrlMapping::new("https://s/1", "https://u/other", "enext"))
            .await
            .unwrap();

        let mapping = storage.find_by_scraped_url("https://s/1").await.unwrap().unwrap();
        assert_eq!(mapping.coupon_url, "https://u/1");
    }

    #[tokio::test]
    async fn test_file_backed_round_trip() {
        let tmp = TempDir::new().unwrap();
        {
            let storage = LocalStorage::open(tmp.path()).await.unwrap();
            CatalogStore::upsert(&storage, record(7, "https://u/7")).await.unwrap();
            ExpiredStore::upsert(&storage, ExpiredRecord::new("https://u/8", Some(8), None))
                .await
                .unwrap();
            storage
                .save(ScrapedUrlMapping::new("https://s/7", "https://u/7", "enext"))
                .await
                .unwrap();
            storage
                .append_all(vec![HistoryEntry::new(
                    "https://u/7",
                    Some(7),
                    Some("Course 7".to_string()),
                    HistoryStatus::New,
                )])
                .await
                .unwrap();
            storage.save_last_round(1_700_000_000_000).await.unwrap();
        }

        let reopened = LocalStorage::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.catalog_len().await, 1);
        assert_eq!(reopened.expired_len().await, 1);
        assert!(reopened.find_by_scraped_url("https://s/7").await.unwrap().is_some());
        assert_eq!(reopened.load_last_round().await.unwrap(), Some(1_700_000_000_000));

        let history = reopened.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HistoryStatus::New);
    }

    #[tokio::test]
    async fn test_open_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::open(tmp.path()).await.unwrap();
        assert_eq!(storage.catalog_len().await, 0);
        assert_eq!(storage.load_last_round().await.unwrap(), None);
        assert!(storage.history().await.unwrap().is_empty());
    }
}
