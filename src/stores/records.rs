use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, warn};

use super::BlobStore;
use crate::dto::{BalanceUpdate, Field, StudentRecord, VaultData, VaultSummary};
use crate::error::{PersistenceError, Result};
use crate::RollNumber;

/// Logical key the whole vault is stored under.
pub const DEFAULT_STORAGE_KEY: &str = "student-vault-data";

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Owns the persisted `roll number -> record` mapping.
///
/// Every operation loads the full mapping from the backend, works on it in
/// memory and writes the full mapping back. Nothing is cached between calls.
pub struct RecordStore<B> {
    backend: B,
    key: String,
    clock: Clock,
}

impl<B: BlobStore> RecordStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_key(backend, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(backend: B, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            clock: Box::new(Utc::now),
        }
    }

    /// Replaces the wall clock used to stamp `last_updated`.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Looks up a single record. A missing record is `None`, not an error.
    pub fn get(&self, roll: &RollNumber) -> Option<StudentRecord> {
        self.load_or_empty().students.remove(roll)
    }

    /// Every record, in no particular order.
    pub fn get_all(&self) -> Vec<StudentRecord> {
        self.load_or_empty().students.into_values().collect()
    }

    /// Every record, ordered by roll number.
    pub fn get_all_sorted(&self) -> Vec<StudentRecord> {
        let mut records = self.get_all();
        records.sort_by(|a, b| a.roll_number.cmp(&b.roll_number));
        records
    }

    /// Roster totals across all records.
    pub fn summary(&self) -> VaultSummary {
        VaultSummary::from_records(&self.get_all())
    }

    /// Upserts a record: creates a zero-balance record if `roll` is absent,
    /// overlays the provided fields and refreshes `last_updated`.
    ///
    /// Amounts are truncated to 4 dp. Negative amounts and amounts at or above
    /// [`AMOUNT_LIMIT`](crate::dto::AMOUNT_LIMIT) are rejected before the
    /// backend is touched.
    pub fn save(&mut self, roll: &RollNumber, update: BalanceUpdate) -> Result<StudentRecord> {
        let update = update.normalize()?;

        let mut data = self.load_for_update()?;
        let previous = data.students.get(roll).map(|r| r.last_updated);
        let now = self.stamp(previous);

        let record = data
            .students
            .entry(roll.clone())
            .or_insert_with(|| StudentRecord::empty(roll.clone(), now));
        for (field, amount) in update.fields() {
            record.set(field, amount);
        }
        record.last_updated = now;
        let record = record.clone();

        self.persist(&data)?;
        debug!(
            roll = %roll,
            created = previous.is_none(),
            phone_pe = %record.phone_pe,
            cash = %record.cash,
            "record saved"
        );
        Ok(record)
    }

    /// Removes a record. Deleting an absent roll number is a no-op.
    pub fn delete(&mut self, roll: &RollNumber) -> Result<()> {
        let mut data = self.load_for_update()?;
        if data.students.remove(roll).is_none() {
            debug!(roll = %roll, "delete of absent record ignored");
            return Ok(());
        }
        self.persist(&data)?;
        debug!(roll = %roll, "record deleted");
        Ok(())
    }

    /// Zeroes one balance of an existing record and refreshes `last_updated`.
    /// Returns `None` without writing anything if the record does not exist.
    pub fn clear_field(&mut self, roll: &RollNumber, field: Field) -> Result<Option<StudentRecord>> {
        let mut data = self.load_for_update()?;
        let Some(record) = data.students.get_mut(roll) else {
            debug!(roll = %roll, %field, "clear of absent record ignored");
            return Ok(None);
        };
        let now = self.stamp(Some(record.last_updated));
        record.set(field, Decimal::ZERO);
        record.last_updated = now;
        let record = record.clone();

        self.persist(&data)?;
        debug!(roll = %roll, %field, "field cleared");
        Ok(Some(record))
    }

    /// `now`, but never earlier than the record's previous stamp.
    fn stamp(&self, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let now = (self.clock)();
        match previous {
            Some(previous) if previous > now => previous,
            _ => now,
        }
    }

    fn load(&self) -> Result<VaultData, PersistenceError> {
        let Some(blob) = self.backend.read(&self.key)? else {
            return Ok(VaultData::default());
        };
        let data: VaultData = serde_json::from_slice(&blob)?;
        data.check_consistency().map_err(PersistenceError::Corrupt)?;
        Ok(data)
    }

    /// Read-only callers see an unreadable vault as empty.
    fn load_or_empty(&self) -> VaultData {
        self.load().unwrap_or_else(|e| {
            warn!(key = %self.key, error = %e, "vault unreadable, treating as empty");
            VaultData::default()
        })
    }

    /// Mutating callers must not overwrite a vault they could not read.
    fn load_for_update(&self) -> Result<VaultData> {
        self.load().map_err(|e| {
            error!(key = %self.key, error = %e, "vault unreadable, refusing to write");
            e.into()
        })
    }

    fn persist(&mut self, data: &VaultData) -> Result<(), PersistenceError> {
        let blob = serde_json::to_vec(data)?;
        self.backend.write(&self.key, &blob).map_err(|e| {
            error!(key = %self.key, error = %e, "failed to save vault");
            PersistenceError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::AMOUNT_LIMIT;
    use crate::stores::MemoryBlobStore;
    use crate::Error;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::io;
    use std::rc::Rc;

    fn roll(s: &str) -> RollNumber {
        RollNumber::parse(s).unwrap()
    }

    fn store() -> RecordStore<MemoryBlobStore> {
        RecordStore::new(MemoryBlobStore::new())
    }

    /// A clock the test can move, including backwards.
    fn manual_clock() -> (Rc<Cell<DateTime<Utc>>>, impl Fn() -> DateTime<Utc>) {
        let now = Rc::new(Cell::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let handle = Rc::clone(&now);
        (now, move || handle.get())
    }

    /// Backend whose reads and writes can be made to fail.
    #[derive(Default)]
    struct FlakyBlobStore {
        inner: MemoryBlobStore,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl BlobStore for FlakyBlobStore {
        fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::Other, "disk unavailable"));
            }
            self.inner.read(key)
        }

        fn write(&mut self, key: &str, blob: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.write(key, blob)
        }
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = store();
        assert!(store.get(&roll("07")).is_none());
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_save_then_get() {
        let mut store = store();
        let before = Utc::now();

        store
            .save(&roll("07"), BalanceUpdate::both(dec!(100), dec!(50)))
            .unwrap();

        let record = store.get(&roll("07")).unwrap();
        assert_eq!(record.roll_number.as_str(), "07");
        assert_eq!(record.phone_pe, dec!(100));
        assert_eq!(record.cash, dec!(50));
        assert!(record.last_updated >= before);
    }

    #[test]
    fn test_save_creates_zero_balance_record() {
        let mut store = store();
        let record = store.save(&roll("A3"), BalanceUpdate::cash(dec!(20))).unwrap();
        assert_eq!(record.phone_pe, Decimal::ZERO);
        assert_eq!(record.cash, dec!(20));
    }

    #[test]
    fn test_partial_update_preserves_other_field() {
        let mut store = store();
        store
            .save(&roll("07"), BalanceUpdate::both(dec!(100), dec!(50)))
            .unwrap();
        store.save(&roll("07"), BalanceUpdate::cash(dec!(75))).unwrap();

        let record = store.get(&roll("07")).unwrap();
        assert_eq!(record.phone_pe, dec!(100));
        assert_eq!(record.cash, dec!(75));
    }

    #[test]
    fn test_empty_update_refreshes_timestamp_only() {
        let (now, clock) = manual_clock();
        let mut store = store().with_clock(clock);
        store
            .save(&roll("07"), BalanceUpdate::both(dec!(1), dec!(2)))
            .unwrap();

        now.set(now.get() + Duration::minutes(5));
        let record = store.save(&roll("07"), BalanceUpdate::default()).unwrap();

        assert_eq!(record.phone_pe, dec!(1));
        assert_eq!(record.cash, dec!(2));
        assert_eq!(record.last_updated, now.get());
    }

    #[test]
    fn test_save_rejects_negative_without_mutation() {
        let mut store = store();
        store
            .save(&roll("07"), BalanceUpdate::both(dec!(100), dec!(50)))
            .unwrap();

        let result = store.save(&roll("07"), BalanceUpdate::both(dec!(10), dec!(-1)));
        assert!(matches!(
            result,
            Err(Error::InvalidAmount { field: Field::Cash, .. })
        ));

        let record = store.get(&roll("07")).unwrap();
        assert_eq!(record.phone_pe, dec!(100));
        assert_eq!(record.cash, dec!(50));

        // A rejected first write creates nothing
        assert!(store
            .save(&roll("08"), BalanceUpdate::phone_pe(dec!(-5)))
            .is_err());
        assert!(store.get(&roll("08")).is_none());
    }

    #[test]
    fn test_save_rejects_oversized_amount_and_vault_stays_usable() {
        let mut store = store();
        store.save(&roll("01"), BalanceUpdate::cash(dec!(10))).unwrap();

        for amount in [Decimal::MAX, AMOUNT_LIMIT] {
            assert!(matches!(
                store.save(&roll("02"), BalanceUpdate::cash(amount)),
                Err(Error::InvalidAmount { field: Field::Cash, .. })
            ));
        }

        assert_eq!(store.get_all().len(), 1);
        store.save(&roll("03"), BalanceUpdate::cash(dec!(1))).unwrap();
        assert_eq!(store.get_all().len(), 2);
    }

    #[test]
    fn test_largest_amount_survives_reload_exactly() {
        let mut store = store();
        let largest = dec!(99999999999.9999);
        let saved = store
            .save(&roll("07"), BalanceUpdate::both(largest, dec!(0.0001)))
            .unwrap();

        let loaded = store.get(&roll("07")).unwrap();
        assert_eq!(saved, loaded);
        assert_eq!(loaded.phone_pe, largest);
        assert_eq!(loaded.cash, dec!(0.0001));
    }

    #[test]
    fn test_save_truncates_to_4dp_like_get() {
        let mut store = store();
        let saved = store
            .save(&roll("07"), BalanceUpdate::both(dec!(12.345678), dec!(0.99999)))
            .unwrap();

        assert_eq!(saved.phone_pe, dec!(12.3456));
        assert_eq!(saved.cash, dec!(0.9999));
        assert_eq!(store.get(&roll("07")).unwrap(), saved);
    }

    #[test]
    fn test_timestamp_never_goes_backwards() {
        let (now, clock) = manual_clock();
        let mut store = store().with_clock(clock);
        let first = store.save(&roll("07"), BalanceUpdate::cash(dec!(1))).unwrap();

        now.set(now.get() - Duration::hours(1));
        let second = store.save(&roll("07"), BalanceUpdate::cash(dec!(2))).unwrap();
        assert_eq!(second.last_updated, first.last_updated);

        let cleared = store.clear_field(&roll("07"), Field::Cash).unwrap().unwrap();
        assert_eq!(cleared.last_updated, first.last_updated);

        // A fresh record still takes the (earlier) clock time
        let other = store.save(&roll("08"), BalanceUpdate::cash(dec!(1))).unwrap();
        assert_eq!(other.last_updated, now.get());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = store();
        store.save(&roll("99"), BalanceUpdate::cash(dec!(5))).unwrap();

        store.delete(&roll("99")).unwrap();
        assert!(store.get(&roll("99")).is_none());
        store.delete(&roll("99")).unwrap();
        assert!(store.get(&roll("99")).is_none());
    }

    #[test]
    fn test_delete_leaves_other_records() {
        let mut store = store();
        store.save(&roll("01"), BalanceUpdate::cash(dec!(1))).unwrap();
        store.save(&roll("02"), BalanceUpdate::cash(dec!(2))).unwrap();

        store.delete(&roll("01")).unwrap();
        assert!(store.get(&roll("01")).is_none());
        assert_eq!(store.get(&roll("02")).unwrap().cash, dec!(2));
    }

    #[test]
    fn test_clear_field_zeroes_only_that_field() {
        let (now, clock) = manual_clock();
        let mut store = store().with_clock(clock);
        store
            .save(&roll("07"), BalanceUpdate::both(dec!(100), dec!(50)))
            .unwrap();

        now.set(now.get() + Duration::seconds(30));
        let cleared = store.clear_field(&roll("07"), Field::Cash).unwrap().unwrap();
        assert_eq!(cleared.cash, Decimal::ZERO);
        assert_eq!(cleared.phone_pe, dec!(100));
        assert_eq!(cleared.last_updated, now.get());
        assert_eq!(store.get(&roll("07")), Some(cleared));

        store.clear_field(&roll("07"), Field::PhonePe).unwrap();
        let record = store.get(&roll("07")).unwrap();
        assert_eq!(record.total(), Decimal::ZERO);
    }

    #[test]
    fn test_clear_field_on_absent_record_is_noop() {
        let mut store = store();
        store.save(&roll("01"), BalanceUpdate::cash(dec!(1))).unwrap();
        let blob_before = store.backend().read(DEFAULT_STORAGE_KEY).unwrap();

        assert_eq!(store.clear_field(&roll("07"), Field::Cash).unwrap(), None);

        assert!(store.get(&roll("07")).is_none());
        assert_eq!(store.backend().read(DEFAULT_STORAGE_KEY).unwrap(), blob_before);
    }

    #[test]
    fn test_get_all_matches_present_keys() {
        let mut store = store();
        let mut expected = BTreeSet::new();
        let ops: [(&str, bool); 8] = [
            ("01", true),
            ("A0", true),
            ("B0", true),
            ("01", false),
            ("55", true),
            ("A0", true),
            ("77", false),
            ("B0", false),
        ];
        for (key, is_save) in ops {
            if is_save {
                store.save(&roll(key), BalanceUpdate::cash(dec!(1))).unwrap();
                expected.insert(key.to_string());
            } else {
                store.delete(&roll(key)).unwrap();
                expected.remove(key);
            }
            let actual: BTreeSet<String> = store
                .get_all()
                .into_iter()
                .map(|r| r.roll_number.to_string())
                .collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_get_all_sorted() {
        let mut store = store();
        for key in ["B0", "10", "A1", "02"] {
            store.save(&roll(key), BalanceUpdate::cash(dec!(1))).unwrap();
        }
        let order: Vec<String> = store
            .get_all_sorted()
            .into_iter()
            .map(|r| r.roll_number.to_string())
            .collect();
        assert_eq!(order, vec!["02", "10", "A1", "B0"]);
    }

    #[test]
    fn test_summary_totals() {
        let mut store = store();
        store
            .save(&roll("01"), BalanceUpdate::both(dec!(100), dec!(50)))
            .unwrap();
        store
            .save(&roll("02"), BalanceUpdate::both(dec!(20.5), dec!(0)))
            .unwrap();

        let summary = store.summary();
        assert_eq!(summary.students, 2);
        assert_eq!(summary.phone_pe, dec!(120.5));
        assert_eq!(summary.cash, dec!(50));
        assert_eq!(summary.grand_total, dec!(170.5));
    }

    #[test]
    fn test_persisted_layout() {
        let mut store = store().with_clock(|| Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        store
            .save(&roll("07"), BalanceUpdate::both(dec!(100), dec!(50)))
            .unwrap();

        let blob = store.backend().read(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&blob).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "students": {
                    "07": {
                        "rollNumber": "07",
                        "phonePe": 100,
                        "cash": 50,
                        "lastUpdated": "2024-01-02T03:04:05Z"
                    }
                }
            })
        );
    }

    #[test]
    fn test_reads_degrade_to_empty_on_corrupt_blob() {
        let mut backend = MemoryBlobStore::new();
        backend.write(DEFAULT_STORAGE_KEY, b"not json").unwrap();
        let store = RecordStore::new(backend);

        assert!(store.get_all().is_empty());
        assert!(store.get(&roll("07")).is_none());
        assert_eq!(store.summary().students, 0);
    }

    #[test]
    fn test_writes_refuse_to_clobber_corrupt_blob() {
        let mut backend = MemoryBlobStore::new();
        backend.write(DEFAULT_STORAGE_KEY, b"not json").unwrap();
        let mut store = RecordStore::new(backend);

        let result = store.save(&roll("07"), BalanceUpdate::cash(dec!(1)));
        assert!(matches!(
            result,
            Err(Error::Persistence(PersistenceError::Json(_)))
        ));
        assert!(store.delete(&roll("07")).is_err());
        assert!(store.clear_field(&roll("07"), Field::Cash).is_err());

        // The corrupt blob is still there for manual recovery
        assert_eq!(
            store.backend().read(DEFAULT_STORAGE_KEY).unwrap(),
            Some(b"not json".to_vec())
        );
    }

    #[test]
    fn test_inconsistent_blob_is_corrupt() {
        let mut backend = MemoryBlobStore::new();
        backend
            .write(
                DEFAULT_STORAGE_KEY,
                br#"{"students":{"08":{"rollNumber":"07","phonePe":1,"cash":0,"lastUpdated":"2024-03-01T10:15:00Z"}}}"#,
            )
            .unwrap();
        let mut store = RecordStore::new(backend);

        assert!(store.get_all().is_empty());
        assert!(matches!(
            store.save(&roll("07"), BalanceUpdate::cash(dec!(1))),
            Err(Error::Persistence(PersistenceError::Corrupt(_)))
        ));
    }

    #[test]
    fn test_read_failure_degrades_and_blocks_writes() {
        let backend = FlakyBlobStore {
            fail_reads: true,
            ..Default::default()
        };
        let mut store = RecordStore::new(backend);

        assert!(store.get_all().is_empty());
        assert!(matches!(
            store.save(&roll("07"), BalanceUpdate::cash(dec!(1))),
            Err(Error::Persistence(PersistenceError::Io(_)))
        ));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let mut store = RecordStore::new(FlakyBlobStore::default());
        store.save(&roll("07"), BalanceUpdate::cash(dec!(1))).unwrap();

        let mut backend = store.into_backend();
        backend.fail_writes = true;
        let mut store = RecordStore::new(backend);

        assert!(matches!(
            store.save(&roll("07"), BalanceUpdate::cash(dec!(9))),
            Err(Error::Persistence(PersistenceError::Io(_)))
        ));
        assert!(store.delete(&roll("07")).is_err());
        assert!(store.clear_field(&roll("07"), Field::Cash).is_err());

        // Nothing changed
        assert_eq!(store.get(&roll("07")).unwrap().cash, dec!(1));
    }

    #[test]
    fn test_custom_storage_key() {
        let mut store = RecordStore::with_key(MemoryBlobStore::new(), "roster-b");
        store.save(&roll("07"), BalanceUpdate::cash(dec!(1))).unwrap();

        let backend = store.into_backend();
        assert!(backend.read("roster-b").unwrap().is_some());
        assert!(backend.read(DEFAULT_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = crate::stores::FileBlobStore::open(dir.path()).unwrap();
            let mut store = RecordStore::new(backend);
            store
                .save(&roll("a1"), BalanceUpdate::both(dec!(12.5), dec!(3)))
                .unwrap();
        }

        let backend = crate::stores::FileBlobStore::open(dir.path()).unwrap();
        let store = RecordStore::new(backend);
        let record = store.get(&roll("A1")).unwrap();
        assert_eq!(record.phone_pe, dec!(12.5));
        assert_eq!(record.cash, dec!(3));
    }
}
