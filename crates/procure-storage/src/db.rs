//! RocksDB wrapper for procure storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Watermark upsert/read
//! - Record, embedding and result rows with a day-bucketing time index
//! - Conditional (null-only) result writes
//! - Catalog rows

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use procure_types::{CategorizationResult, Category, RecordMeta, Stage, WatermarkRow};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_CATEGORIES, CF_EMBEDDINGS, CF_RECORDS,
    CF_RECORD_TIMES, CF_RESULTS, CF_WATERMARKS,
};
use crate::error::StorageError;
use crate::keys::{
    encode_vector, CategoryKey, RecordKey, RecordTimeKey, UnstampedKey, WatermarkKey,
};

/// Number of row lock stripes guarding read-check-write sequences.
const ROW_LOCK_STRIPES: usize = 64;

/// Main storage interface for procure
pub struct Storage {
    db: DB,
    /// Striped row locks for compare-and-set writes
    row_locks: Vec<Mutex<()>>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let row_locks = (0..ROW_LOCK_STRIPES).map(|_| Mutex::new(())).collect();

        Ok(Self { db, row_locks })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn lock_row(&self, key: &[u8]) -> Result<MutexGuard<'_, ()>, StorageError> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.row_locks.len();
        self.row_locks[stripe]
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    // ==================== Watermark Methods ====================

    /// Upsert a watermark row (last write wins).
    pub fn put_watermark(&self, row: &WatermarkRow) -> Result<(), StorageError> {
        let cf = self.cf(CF_WATERMARKS)?;
        let key = WatermarkKey::new(row.domain.clone(), row.stage);
        self.db.put_cf(cf, key.to_bytes(), row.to_bytes()?)?;
        debug!(domain = %row.domain, stage = %row.stage, date = %row.date, "Stored watermark");
        Ok(())
    }

    /// Read a watermark row.
    pub fn get_watermark(
        &self,
        domain: &str,
        stage: Stage,
    ) -> Result<Option<WatermarkRow>, StorageError> {
        let cf = self.cf(CF_WATERMARKS)?;
        let key = WatermarkKey::new(domain, stage);
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(WatermarkRow::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    // ==================== Record Methods ====================

    /// Store record metadata and keep the time index in step with it.
    ///
    /// Re-putting a record whose effective timestamp changed moves its
    /// index entry to the new day.
    pub fn put_record(&self, record: &RecordMeta) -> Result<(), StorageError> {
        let records_cf = self.cf(CF_RECORDS)?;
        let times_cf = self.cf(CF_RECORD_TIMES)?;
        let key = RecordKey::new(record.domain.clone(), record.id.clone());

        let _guard = self.lock_row(&key.meta_bytes())?;

        let mut batch = WriteBatch::default();
        if let Some(previous) = self.get_record(&record.domain, &record.id)? {
            if let Some(ts) = previous.effective_timestamp() {
                let old = RecordTimeKey::new(&record.domain, ts.timestamp_millis(), &record.id);
                batch.delete_cf(times_cf, old.to_bytes());
            }
        }
        let unstamped = UnstampedKey::new(&record.domain, &record.id);
        match record.effective_timestamp() {
            Some(ts) => {
                let index = RecordTimeKey::new(&record.domain, ts.timestamp_millis(), &record.id);
                batch.put_cf(times_cf, index.to_bytes(), b"");
                batch.delete_cf(times_cf, unstamped.to_bytes());
            }
            None => batch.put_cf(times_cf, unstamped.to_bytes(), b""),
        }
        batch.put_cf(records_cf, key.meta_bytes(), record.to_bytes()?);

        self.db.write(batch)?;
        Ok(())
    }

    /// Get record metadata.
    pub fn get_record(&self, domain: &str, id: &str) -> Result<Option<RecordMeta>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let key = RecordKey::new(domain, id);
        match self.db.get_cf(cf, key.meta_bytes())? {
            Some(bytes) => Ok(Some(RecordMeta::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a record's embedding.
    ///
    /// When the record has no business timestamp, the embedding time becomes
    /// its effective timestamp and the record is indexed under that day.
    pub fn put_embedding(
        &self,
        domain: &str,
        id: &str,
        values: &[f32],
        embedded_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let records_cf = self.cf(CF_RECORDS)?;
        let times_cf = self.cf(CF_RECORD_TIMES)?;
        let embeddings_cf = self.cf(CF_EMBEDDINGS)?;
        let key = RecordKey::new(domain, id);

        let _guard = self.lock_row(&key.meta_bytes())?;

        let mut record = self
            .get_record(domain, id)?
            .ok_or_else(|| StorageError::NotFound(format!("record {}:{}", domain, id)))?;

        let mut batch = WriteBatch::default();
        if record.effective_timestamp().is_none() {
            let index = RecordTimeKey::new(domain, embedded_at.timestamp_millis(), id);
            batch.put_cf(times_cf, index.to_bytes(), b"");
            batch.delete_cf(times_cf, UnstampedKey::new(domain, id).to_bytes());
        }
        if record.embedded_at.is_none() {
            record.embedded_at = Some(embedded_at);
            batch.put_cf(records_cf, key.meta_bytes(), record.to_bytes()?);
        }
        batch.put_cf(embeddings_cf, key.embedding_bytes(), encode_vector(values));

        self.db.write(batch)?;
        Ok(())
    }

    /// Store a raw embedding payload as-is.
    ///
    /// Used by ingestion tooling that already holds encoded vectors; no
    /// validation is performed, so scorers must tolerate malformed rows.
    pub fn put_embedding_bytes(
        &self,
        domain: &str,
        id: &str,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let key = RecordKey::new(domain, id);
        self.db.put_cf(cf, key.embedding_bytes(), bytes)?;
        Ok(())
    }

    /// Fetch raw embedding payloads for a batch of record IDs.
    ///
    /// Output is parallel to `ids`; `None` means no embedding row.
    pub fn get_embeddings(
        &self,
        domain: &str,
        ids: &[String],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let cf = self.cf(CF_EMBEDDINGS)?;
        let keys: Vec<Vec<u8>> = ids
            .iter()
            .map(|id| RecordKey::new(domain, id.as_str()).embedding_bytes())
            .collect();

        self.db
            .multi_get_cf(keys.iter().map(|k| (cf, k.as_slice())))
            .into_iter()
            .map(|r| r.map_err(StorageError::from))
            .collect()
    }

    /// IDs of records eligible for categorization in `[start_ms, end_ms)`.
    ///
    /// Eligible means: an embedding row exists and no result row exists.
    /// Presence checks use pinned reads so embedding payloads are not copied.
    pub fn pending_ids(
        &self,
        domain: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<String>, StorageError> {
        let embeddings_cf = self.cf(CF_EMBEDDINGS)?;
        let results_cf = self.cf(CF_RESULTS)?;

        let mut pending = Vec::new();
        for id in self.ids_in_range(domain, start_ms, end_ms)? {
            let key = RecordKey::new(domain, id.as_str());
            if self
                .db
                .get_pinned_cf(results_cf, key.result_bytes())?
                .is_some()
            {
                continue;
            }
            if self
                .db
                .get_pinned_cf(embeddings_cf, key.embedding_bytes())?
                .is_none()
            {
                continue;
            }
            pending.push(id);
        }

        debug!(
            domain = %domain,
            start_ms = start_ms,
            end_ms = end_ms,
            count = pending.len(),
            "Selected pending record IDs"
        );
        Ok(pending)
    }

    /// Records in `[start_ms, end_ms)` that have no embedding yet.
    pub fn missing_embedding_records(
        &self,
        domain: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RecordMeta>, StorageError> {
        let embeddings_cf = self.cf(CF_EMBEDDINGS)?;

        let mut missing = Vec::new();
        for id in self.ids_in_range(domain, start_ms, end_ms)? {
            let key = RecordKey::new(domain, id.as_str());
            if self
                .db
                .get_pinned_cf(embeddings_cf, key.embedding_bytes())?
                .is_some()
            {
                continue;
            }
            if let Some(record) = self.get_record(domain, &id)? {
                missing.push(record);
            }
        }
        Ok(missing)
    }

    /// Records with no timestamp and no embedding.
    ///
    /// These cannot be placed on a day until an embedding is written, so
    /// the backfill stage picks them up outside its day window.
    pub fn unstamped_records(&self, domain: &str) -> Result<Vec<RecordMeta>, StorageError> {
        let times_cf = self.cf(CF_RECORD_TIMES)?;
        let embeddings_cf = self.cf(CF_EMBEDDINGS)?;
        let prefix = UnstampedKey::prefix(domain);

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(times_cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(UnstampedKey::from_bytes(domain, &key)?.id);
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let key = RecordKey::new(domain, id.as_str());
            if self
                .db
                .get_pinned_cf(embeddings_cf, key.embedding_bytes())?
                .is_some()
            {
                continue;
            }
            if let Some(record) = self.get_record(domain, &id)? {
                records.push(record);
            }
        }
        debug!(domain = %domain, count = records.len(), "Found unstamped records");
        Ok(records)
    }

    /// Walk the time index for one domain over `[start_ms, end_ms)`.
    fn ids_in_range(
        &self,
        domain: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<String>, StorageError> {
        let cf = self.cf(CF_RECORD_TIMES)?;

        let start_prefix = RecordTimeKey::prefix_start(domain, start_ms);
        let end_prefix = RecordTimeKey::prefix_end(domain, end_ms);

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item?;
            // Stop if we've passed the end prefix
            if key.as_ref() >= end_prefix.as_slice() {
                break;
            }
            ids.push(RecordTimeKey::from_bytes(domain, &key)?.id);
        }
        Ok(ids)
    }

    // ==================== Result Methods ====================

    /// Write a result only if the record has none (compare-and-set).
    ///
    /// Returns `true` when the row changed. A `false` return means another
    /// writer got there first, which callers treat as a benign race.
    pub fn apply_result_if_unset(
        &self,
        domain: &str,
        id: &str,
        result: &CategorizationResult,
    ) -> Result<bool, StorageError> {
        let cf = self.cf(CF_RESULTS)?;
        let key = RecordKey::new(domain, id).result_bytes();

        let _guard = self.lock_row(&key)?;
        if self.db.get_pinned_cf(cf, &key)?.is_some() {
            debug!(domain = %domain, id = %id, "Result already set, skipping");
            return Ok(false);
        }
        self.db.put_cf(cf, &key, result.to_bytes()?)?;
        Ok(true)
    }

    /// Read a record's categorization result.
    pub fn get_result(
        &self,
        domain: &str,
        id: &str,
    ) -> Result<Option<CategorizationResult>, StorageError> {
        let cf = self.cf(CF_RESULTS)?;
        let key = RecordKey::new(domain, id);
        match self.db.get_cf(cf, key.result_bytes())? {
            Some(bytes) => Ok(Some(CategorizationResult::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    // ==================== Catalog Methods ====================

    /// Store a catalog category.
    pub fn put_category(&self, category: &Category) -> Result<(), StorageError> {
        let cf = self.cf(CF_CATEGORIES)?;
        let key = CategoryKey::new(category.code.clone());
        self.db.put_cf(cf, key.to_bytes(), category.to_bytes()?)?;
        Ok(())
    }

    /// Load the whole catalog in key order.
    pub fn load_categories(&self) -> Result<Vec<Category>, StorageError> {
        let cf = self.cf(CF_CATEGORIES)?;
        let mut categories = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            categories.push(Category::from_bytes(&value)?);
        }
        Ok(categories)
    }

    // ==================== Maintenance ====================

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Get storage statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            watermark_count: self.count_cf_entries(self.cf(CF_WATERMARKS)?)?,
            record_count: self.count_cf_entries(self.cf(CF_RECORDS)?)?,
            embedding_count: self.count_cf_entries(self.cf(CF_EMBEDDINGS)?)?,
            result_count: self.count_cf_entries(self.cf(CF_RESULTS)?)?,
            category_count: self.count_cf_entries(self.cf(CF_CATEGORIES)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let path = self.db.path();
        let mut total_size = 0u64;

        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }

        total_size
    }
}

/// Statistics about the storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of watermark rows
    pub watermark_count: u64,
    /// Number of record metadata rows
    pub record_count: u64,
    /// Number of stored embeddings
    pub embedding_count: u64,
    /// Number of categorization results
    pub result_count: u64,
    /// Number of catalog categories
    pub category_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use procure_types::day_bounds_ms;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn result(code: &str) -> CategorizationResult {
        CategorizationResult::from_ranked(vec![(code.to_string(), 0.9)], 0.0)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(storage.db.cf_handle(cf_name).is_some(), "missing {}", cf_name);
        }
    }

    #[test]
    fn test_watermark_roundtrip() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.get_watermark("tenders", Stage::Categorized).unwrap().is_none());

        let row = WatermarkRow::new("tenders", Stage::Categorized, day(2024, 1, 31));
        storage.put_watermark(&row).unwrap();

        let loaded = storage.get_watermark("tenders", Stage::Categorized).unwrap().unwrap();
        assert_eq!(loaded.date, day(2024, 1, 31));

        // Last write wins
        let row = WatermarkRow::new("tenders", Stage::Categorized, day(2024, 2, 1));
        storage.put_watermark(&row).unwrap();
        let loaded = storage.get_watermark("tenders", Stage::Categorized).unwrap().unwrap();
        assert_eq!(loaded.date, day(2024, 2, 1));

        // Other stages and domains are independent
        assert!(storage.get_watermark("tenders", Stage::Embedded).unwrap().is_none());
        assert!(storage.get_watermark("awards", Stage::Categorized).unwrap().is_none());
    }

    #[test]
    fn test_pending_ids_respects_day_bounds() {
        let (storage, _temp) = create_test_storage();

        // One millisecond before midnight, exactly midnight, late in the day,
        // and exactly the next midnight.
        let times = [
            ("before", Utc.with_ymd_and_hms(2024, 3, 4, 23, 59, 59).unwrap() + chrono::Duration::milliseconds(999)),
            ("midnight", Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()),
            ("late", Utc.with_ymd_and_hms(2024, 3, 5, 23, 0, 0).unwrap()),
            ("next", Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()),
        ];
        for (id, ts) in times {
            storage.put_record(&RecordMeta::new("tenders", id, Some(ts))).unwrap();
            storage.put_embedding("tenders", id, &[1.0, 0.0], ts).unwrap();
        }

        let (start, end) = day_bounds_ms(day(2024, 3, 5));
        let ids = storage.pending_ids("tenders", start, end).unwrap();
        assert_eq!(ids, vec!["midnight".to_string(), "late".to_string()]);
    }

    #[test]
    fn test_pending_ids_requires_embedding_and_no_result() {
        let (storage, _temp) = create_test_storage();
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();

        storage.put_record(&RecordMeta::new("tenders", "no-emb", Some(ts))).unwrap();
        storage.put_record(&RecordMeta::new("tenders", "done", Some(ts))).unwrap();
        storage.put_embedding("tenders", "done", &[1.0], ts).unwrap();
        storage.apply_result_if_unset("tenders", "done", &result("A")).unwrap();
        storage.put_record(&RecordMeta::new("tenders", "ready", Some(ts))).unwrap();
        storage.put_embedding("tenders", "ready", &[1.0], ts).unwrap();

        let (start, end) = day_bounds_ms(day(2024, 3, 5));
        let ids = storage.pending_ids("tenders", start, end).unwrap();
        assert_eq!(ids, vec!["ready".to_string()]);
    }

    #[test]
    fn test_record_without_business_time_uses_embedding_time() {
        let (storage, _temp) = create_test_storage();
        let embedded_at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        storage.put_record(&RecordMeta::new("tenders", "T-9", None)).unwrap();
        let (start, end) = day_bounds_ms(day(2024, 6, 1));
        assert!(storage.pending_ids("tenders", start, end).unwrap().is_empty());

        storage.put_embedding("tenders", "T-9", &[0.5, 0.5], embedded_at).unwrap();
        assert_eq!(
            storage.pending_ids("tenders", start, end).unwrap(),
            vec!["T-9".to_string()]
        );
    }

    #[test]
    fn test_unstamped_records_until_embedded() {
        let (storage, _temp) = create_test_storage();
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        storage
            .put_record(&RecordMeta::new("tenders", "T-9", None).with_text("fuel supply"))
            .unwrap();
        storage.put_record(&RecordMeta::new("tenders", "T-1", Some(ts))).unwrap();
        storage.put_record(&RecordMeta::new("awards", "A-9", None)).unwrap();

        let unstamped = storage.unstamped_records("tenders").unwrap();
        assert_eq!(unstamped.len(), 1);
        assert_eq!(unstamped[0].id, "T-9");

        storage.put_embedding("tenders", "T-9", &[0.5, 0.5], ts).unwrap();
        assert!(storage.unstamped_records("tenders").unwrap().is_empty());
        assert_eq!(storage.unstamped_records("awards").unwrap().len(), 1);
    }

    #[test]
    fn test_stamping_record_clears_unstamped_entry() {
        let (storage, _temp) = create_test_storage();
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        storage.put_record(&RecordMeta::new("tenders", "T-9", None)).unwrap();
        storage.put_record(&RecordMeta::new("tenders", "T-9", Some(ts))).unwrap();

        assert!(storage.unstamped_records("tenders").unwrap().is_empty());
        let (start, end) = day_bounds_ms(day(2024, 6, 1));
        assert_eq!(storage.missing_embedding_records("tenders", start, end).unwrap().len(), 1);
    }

    #[test]
    fn test_put_record_moves_index_entry() {
        let (storage, _temp) = create_test_storage();
        let first = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();

        storage.put_record(&RecordMeta::new("tenders", "T-1", Some(first))).unwrap();
        storage.put_embedding("tenders", "T-1", &[1.0], first).unwrap();
        storage.put_record(&RecordMeta::new("tenders", "T-1", Some(second))).unwrap();

        let (s5, e5) = day_bounds_ms(day(2024, 3, 5));
        let (s7, e7) = day_bounds_ms(day(2024, 3, 7));
        assert!(storage.pending_ids("tenders", s5, e5).unwrap().is_empty());
        assert_eq!(storage.pending_ids("tenders", s7, e7).unwrap().len(), 1);
    }

    #[test]
    fn test_put_embedding_unknown_record() {
        let (storage, _temp) = create_test_storage();
        let err = storage
            .put_embedding("tenders", "ghost", &[1.0], Utc::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_apply_result_is_write_once() {
        let (storage, _temp) = create_test_storage();

        assert!(storage.apply_result_if_unset("tenders", "T-1", &result("A")).unwrap());
        assert!(!storage.apply_result_if_unset("tenders", "T-1", &result("B")).unwrap());

        let stored = storage.get_result("tenders", "T-1").unwrap().unwrap();
        assert_eq!(stored.best(), Some("A"));
    }

    #[test]
    fn test_concurrent_apply_changes_row_once() {
        let temp_dir = TempDir::new().unwrap();
        let storage = std::sync::Arc::new(Storage::open(temp_dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    storage
                        .apply_result_if_unset("tenders", "shared", &result(&format!("C{}", i)))
                        .unwrap()
                })
            })
            .collect();

        let changed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|changed| *changed)
            .count();
        assert_eq!(changed, 1);
    }

    #[test]
    fn test_get_embeddings_parallel_to_ids() {
        let (storage, _temp) = create_test_storage();
        let ts = Utc::now();
        storage.put_record(&RecordMeta::new("tenders", "a", Some(ts))).unwrap();
        storage.put_embedding("tenders", "a", &[1.0, 2.0], ts).unwrap();

        let ids = vec!["missing".to_string(), "a".to_string()];
        let rows = storage.get_embeddings("tenders", &ids).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_none());
        assert_eq!(rows[1].as_ref().unwrap().len(), 8);
    }

    #[test]
    fn test_missing_embedding_records() {
        let (storage, _temp) = create_test_storage();
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        storage
            .put_record(&RecordMeta::new("tenders", "a", Some(ts)).with_text("road works"))
            .unwrap();
        storage.put_record(&RecordMeta::new("tenders", "b", Some(ts))).unwrap();
        storage.put_embedding("tenders", "b", &[1.0], ts).unwrap();

        let (start, end) = day_bounds_ms(day(2024, 3, 5));
        let missing = storage.missing_embedding_records("tenders", start, end).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "a");
        assert_eq!(missing[0].text.as_deref(), Some("road works"));
    }

    #[test]
    fn test_categories_roundtrip_and_stats() {
        let (storage, _temp) = create_test_storage();
        storage.put_category(&Category::new("45000000", vec![1.0, 0.0])).unwrap();
        storage.put_category(&Category::new("33000000", vec![0.0, 1.0])).unwrap();

        let categories = storage.load_categories().unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].code, "33000000");

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.category_count, 2);
        assert_eq!(stats.record_count, 0);
    }
}
