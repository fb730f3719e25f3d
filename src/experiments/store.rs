use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use dashmap::{DashMap, DashSet};
use fs2::FileExt;

use super::config::{
    AbTest, BidAdjustmentEvent, CampaignStatus, PerformanceRow, PerformanceTotals, StoreError,
    TestStatus, VariantMetrics,
};

/// Persistence operations the monitor consumes. Performance rows are written
/// upstream; everything else is mutated by the monitor itself.
pub trait TestStore: Send + Sync {
    /// Running tests with the auto-monitor flag set.
    fn list_monitored_tests(&self) -> Result<Vec<AbTest>, StoreError>;

    fn get_test(&self, test_id: &str) -> Result<AbTest, StoreError>;

    fn read_performance_totals(&self, campaign_ref: &str) -> Result<PerformanceTotals, StoreError>;

    fn upsert_variant_metrics(
        &self,
        test_id: &str,
        variant_id: &str,
        metrics: &VariantMetrics,
    ) -> Result<(), StoreError>;

    /// Running -> completed happens at most once; a second completion is rejected.
    /// `now_ms` stamps `completedAt`.
    fn update_test_status(
        &self,
        test_id: &str,
        status: TestStatus,
        winner_variant_id: Option<&str>,
        confidence: Option<f64>,
        now_ms: i64,
    ) -> Result<(), StoreError>;

    fn update_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), StoreError>;

    fn update_campaign_budget_local(
        &self,
        campaign_id: &str,
        amount: f64,
        traffic_allocation: f64,
    ) -> Result<(), StoreError>;

    fn mark_creative_selected(&self, creative_id: &str) -> Result<(), StoreError>;

    fn update_variant_bid_config(&self, variant_id: &str, new_max_cpc: f64)
        -> Result<(), StoreError>;

    fn record_bid_adjustment(&self, event: &BidAdjustmentEvent) -> Result<(), StoreError>;

    /// Returns false when another owner holds an unexpired lease.
    fn acquire_lease(
        &self,
        test_id: &str,
        owner: &str,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<bool, StoreError>;

    fn release_lease(&self, test_id: &str, owner: &str) -> Result<(), StoreError>;
}

/// File-backed store: one JSON document per test under `.ab_tests/`,
/// performance rows as JSON lines under `.performance/`.
pub struct JsonTestStore {
    tests: DashMap<String, AbTest>,
    selected_creatives: DashSet<String>,
    root: PathBuf,
    dir: PathBuf,
    performance_dir: PathBuf,
}

/// Exclusive advisory lock held while a shared file is read and rewritten.
struct FileLock(File);

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

impl JsonTestStore {
    pub fn new(data_dir: &Path) -> Result<Self, StoreError> {
        let dir = data_dir.join(".ab_tests");
        let performance_dir = data_dir.join(".performance");
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(&performance_dir)?;
        let store = Self {
            tests: DashMap::new(),
            selected_creatives: DashSet::new(),
            root: data_dir.to_path_buf(),
            dir,
            performance_dir,
        };
        store.load_all()?;
        store.load_selected_creatives()?;
        Ok(store)
    }

    fn load_all(&self) -> Result<(), StoreError> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            let parsed = serde_json::from_str::<AbTest>(&data)
                .map_err(StoreError::from)
                .and_then(|test| test.validate().map(|_| test));
            match parsed {
                Ok(test) => {
                    self.tests.insert(test.id.clone(), test);
                }
                // One broken document must not hide every other test.
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping invalid test file"),
            }
        }
        Ok(())
    }

    fn load_selected_creatives(&self) -> Result<(), StoreError> {
        let path = self.selected_creatives_path();
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let ids: Vec<String> = serde_json::from_str(&data)?;
            for id in ids {
                self.selected_creatives.insert(id);
            }
        }
        Ok(())
    }

    fn test_path(&self, test_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", test_id))
    }

    fn selected_creatives_path(&self) -> PathBuf {
        self.root.join(".selected_creatives.json")
    }

    fn bid_adjustments_path(&self) -> PathBuf {
        self.root.join(".bid_adjustments.jsonl")
    }

    fn performance_path(&self, campaign_ref: &str) -> PathBuf {
        let safe: String = campaign_ref
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.performance_dir.join(format!("{}.jsonl", safe))
    }

    fn atomic_write(&self, test: &AbTest) -> Result<(), StoreError> {
        let tmp_path = self.dir.join(format!("{}.json.tmp", test.id));
        let data = serde_json::to_string_pretty(test)?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, self.test_path(&test.id))?;
        Ok(())
    }

    fn append_line<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(value)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Applies `f` to a copy of the test and commits it only if `f` succeeds.
    fn mutate<F>(&self, test_id: &str, f: F) -> Result<AbTest, StoreError>
    where
        F: FnOnce(&mut AbTest) -> Result<(), StoreError>,
    {
        let mut entry = self
            .tests
            .get_mut(test_id)
            .ok_or_else(|| StoreError::NotFound(test_id.to_string()))?;
        let mut updated = entry.clone();
        f(&mut updated)?;
        self.atomic_write(&updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    fn find_test_id<P>(&self, predicate: P) -> Option<String>
    where
        P: Fn(&AbTest) -> bool,
    {
        self.tests
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
    }

    fn lock_file(path: PathBuf) -> Result<FileLock, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(FileLock(file))
    }

    fn lock_leases(&self) -> Result<FileLock, StoreError> {
        Self::lock_file(self.dir.join(".lease.lock"))
    }

    fn lock_selected_creatives(&self) -> Result<FileLock, StoreError> {
        Self::lock_file(self.root.join(".selected_creatives.lock"))
    }

    /// Re-reads one test from disk so leases see writes from other processes.
    fn refresh(&self, test_id: &str) -> Result<AbTest, StoreError> {
        let path = self.test_path(test_id);
        if !path.exists() {
            return Err(StoreError::NotFound(test_id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let test: AbTest = serde_json::from_str(&data)?;
        self.tests.insert(test.id.clone(), test.clone());
        Ok(test)
    }

    /// Registers a new test. Used by the setup flow and tests.
    pub fn create(&self, test: AbTest) -> Result<AbTest, StoreError> {
        test.validate()?;
        if self.tests.contains_key(&test.id) || self.test_path(&test.id).exists() {
            return Err(StoreError::AlreadyExists(test.id));
        }
        for v in &test.variants {
            let clash = self.find_test_id(|t| {
                t.variants
                    .iter()
                    .any(|o| o.id == v.id || o.campaign_id == v.campaign_id)
            });
            if let Some(other) = clash {
                return Err(StoreError::InvalidConfig(format!(
                    "variant '{}' or campaign '{}' already belongs to test '{}'",
                    v.id, v.campaign_id, other
                )));
            }
        }
        self.atomic_write(&test)?;
        self.tests.insert(test.id.clone(), test.clone());
        Ok(test)
    }

    /// Appends one upstream performance row for a campaign.
    pub fn append_performance(&self, row: &PerformanceRow) -> Result<(), StoreError> {
        Self::append_line(&self.performance_path(&row.campaign_ref), row)
    }

    pub fn list(&self) -> Vec<AbTest> {
        self.tests.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn bid_adjustments(&self, test_id: &str) -> Result<Vec<BidAdjustmentEvent>, StoreError> {
        let path = self.bid_adjustments_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: BidAdjustmentEvent = serde_json::from_str(&line)?;
            if event.test_id == test_id {
                events.push(event);
            }
        }
        Ok(events)
    }

    pub fn is_creative_selected(&self, creative_id: &str) -> bool {
        self.selected_creatives.contains(creative_id)
    }
}

impl TestStore for JsonTestStore {
    fn list_monitored_tests(&self) -> Result<Vec<AbTest>, StoreError> {
        // Pick up tests registered by other processes since startup.
        self.load_all()?;
        let mut tests: Vec<AbTest> = self
            .tests
            .iter()
            .filter(|entry| {
                entry.value().status == TestStatus::Running && entry.value().auto_monitor
            })
            .map(|entry| entry.value().clone())
            .collect();
        tests.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(tests)
    }

    fn get_test(&self, test_id: &str) -> Result<AbTest, StoreError> {
        self.tests
            .get(test_id)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::NotFound(test_id.to_string()))
    }

    fn read_performance_totals(&self, campaign_ref: &str) -> Result<PerformanceTotals, StoreError> {
        let path = self.performance_path(campaign_ref);
        let mut totals = PerformanceTotals::default();
        if !path.exists() {
            return Ok(totals);
        }
        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: PerformanceRow = serde_json::from_str(&line)?;
            if row.campaign_ref == campaign_ref {
                totals.add(&row);
            }
        }
        Ok(totals)
    }

    fn upsert_variant_metrics(
        &self,
        test_id: &str,
        variant_id: &str,
        metrics: &VariantMetrics,
    ) -> Result<(), StoreError> {
        self.mutate(test_id, |test| {
            let variant = test
                .variants
                .iter_mut()
                .find(|v| v.id == variant_id)
                .ok_or_else(|| StoreError::NotFound(variant_id.to_string()))?;
            variant.metrics = metrics.clone();
            Ok(())
        })?;
        Ok(())
    }

    fn update_test_status(
        &self,
        test_id: &str,
        status: TestStatus,
        winner_variant_id: Option<&str>,
        confidence: Option<f64>,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        self.mutate(test_id, |test| {
            if test.status == TestStatus::Completed {
                return Err(StoreError::InvalidStatus("completed".to_string()));
            }
            if let Some(winner) = winner_variant_id {
                if test.variant(winner).is_none() {
                    return Err(StoreError::NotFound(winner.to_string()));
                }
            }
            test.status = status;
            if status == TestStatus::Completed {
                test.winner_variant_id = winner_variant_id.map(str::to_string);
                test.statistical_confidence = confidence;
                test.completed_at = Some(now_ms);
            }
            Ok(())
        })?;
        Ok(())
    }

    fn update_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        let test_id = self
            .find_test_id(|t| t.variant_by_campaign(campaign_id).is_some())
            .ok_or_else(|| StoreError::NotFound(campaign_id.to_string()))?;
        self.mutate(&test_id, |test| {
            if let Some(v) = test
                .variants
                .iter_mut()
                .find(|v| v.campaign_id == campaign_id)
            {
                v.campaign_status = status;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn update_campaign_budget_local(
        &self,
        campaign_id: &str,
        amount: f64,
        traffic_allocation: f64,
    ) -> Result<(), StoreError> {
        if !(0.0..=1.0).contains(&traffic_allocation) {
            return Err(StoreError::InvalidConfig(format!(
                "trafficAllocation {} out of range",
                traffic_allocation
            )));
        }
        let test_id = self
            .find_test_id(|t| t.variant_by_campaign(campaign_id).is_some())
            .ok_or_else(|| StoreError::NotFound(campaign_id.to_string()))?;
        self.mutate(&test_id, |test| {
            for v in test.variants.iter_mut() {
                if v.campaign_id == campaign_id {
                    v.budget_amount = amount;
                    v.traffic_allocation = traffic_allocation;
                } else if traffic_allocation >= 1.0 {
                    // Full allocation to one campaign leaves nothing for its siblings.
                    v.traffic_allocation = 0.0;
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    fn mark_creative_selected(&self, creative_id: &str) -> Result<(), StoreError> {
        // The file is shared with other processes: merge under the lock.
        let _lock = self.lock_selected_creatives()?;
        self.load_selected_creatives()?;
        self.selected_creatives.insert(creative_id.to_string());
        let mut ids: Vec<String> = self
            .selected_creatives
            .iter()
            .map(|id| id.key().clone())
            .collect();
        ids.sort();
        let path = self.selected_creatives_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&ids)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn update_variant_bid_config(
        &self,
        variant_id: &str,
        new_max_cpc: f64,
    ) -> Result<(), StoreError> {
        if !new_max_cpc.is_finite() || new_max_cpc <= 0.0 {
            return Err(StoreError::InvalidConfig(format!(
                "maxCpc must be positive, got {}",
                new_max_cpc
            )));
        }
        let test_id = self
            .find_test_id(|t| t.variant(variant_id).is_some())
            .ok_or_else(|| StoreError::NotFound(variant_id.to_string()))?;
        self.mutate(&test_id, |test| {
            if let Some(v) = test.variants.iter_mut().find(|v| v.id == variant_id) {
                v.bid.max_cpc = Some(new_max_cpc);
            }
            Ok(())
        })?;
        Ok(())
    }

    fn record_bid_adjustment(&self, event: &BidAdjustmentEvent) -> Result<(), StoreError> {
        Self::append_line(&self.bid_adjustments_path(), event)
    }

    fn acquire_lease(
        &self,
        test_id: &str,
        owner: &str,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<bool, StoreError> {
        let _lock = self.lock_leases()?;
        let current = self.refresh(test_id)?;
        if current.is_lease_held(now_ms) && current.lease_owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        self.mutate(test_id, |test| {
            test.processing_lease_until = Some(now_ms + ttl_ms);
            test.lease_owner = Some(owner.to_string());
            Ok(())
        })?;
        Ok(true)
    }

    fn release_lease(&self, test_id: &str, owner: &str) -> Result<(), StoreError> {
        let _lock = self.lock_leases()?;
        let current = self.refresh(test_id)?;
        if current.lease_owner.as_deref() != Some(owner) {
            return Ok(());
        }
        self.mutate(test_id, |test| {
            test.processing_lease_until = None;
            test.lease_owner = None;
            Ok(())
        })?;
        Ok(())
    }
}
