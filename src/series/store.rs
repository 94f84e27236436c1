//! Consumer-side time-series store.
//!
//! Holds one time-sorted line per series key, applies a sliding retention
//! window, and memoizes derived views (simplified render data, label masks)
//! until the keys they depend on change.
//!
//! # Invalidation
//!
//! Every mutation bumps a generation counter. Each key remembers the
//! generation it last changed at, and the store remembers when it was last
//! cleared and when retention last changed. A memoized view computed at
//! generation `g` for keys `K` is valid while no key in `K`, no clear and no
//! retention change is newer than `g`.

use crate::core::{PulseError, Result, StoreConfig};
use crate::series::clock::{Clock, SystemClock};
use crate::series::mask::TimeMask;
use crate::series::sample::{KeyedSample, MinAndMax, Sample, SeriesKey};
use crate::series::simplify::{simplify_to_max_points, SimplifyOptions};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Store shared between one writer and any number of readers
pub type SharedStore = Arc<RwLock<TimeSeriesStore>>;

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const OP_SIMPLIFIED: &str = "simplified";
const OP_MASK: &str = "mask";

/// Treatment of samples that share a key and a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep every sample
    Append,
    /// Keep only the most recently written sample
    ReplaceOnEqualTime,
}

/// What a mutation changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeEvent {
    /// Keys whose line changed in any way
    pub changed_keys: Vec<SeriesKey>,
    /// Keys whose newest sample changed
    pub last_value_changed_keys: Vec<SeriesKey>,
    pub retention_changed: bool,
    pub time_window_changed: bool,
}

impl ChangeEvent {
    /// Whether a view over `keys` needs to be redrawn.
    pub fn touches<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        self.retention_changed
            || self.time_window_changed
            || self
                .changed_keys
                .iter()
                .any(|changed| keys.iter().any(|key| key.as_ref() == &**changed))
    }

    pub fn is_empty(&self) -> bool {
        self.changed_keys.is_empty() && !self.retention_changed && !self.time_window_changed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Merges that appended without re-sorting
    pub fast_appends: u64,
    /// Merges that required a full stable sort
    pub full_sorts: u64,
    /// Samples dropped by the retention window
    pub trimmed_samples: u64,
    /// Samples removed as equal-time duplicates
    pub replaced_samples: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreOptions {
    pub simplify: SimplifyOptions,
    pub duplicate_policy: DuplicatePolicy,
    /// Retention window edges are snapped to this many milliseconds
    pub time_window_raster_ms: f64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            simplify: SimplifyOptions::default(),
            duplicate_policy: DuplicatePolicy::Append,
            time_window_raster_ms: 100.0,
        }
    }
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            simplify: SimplifyOptions::new(config.max_points, config.min_points),
            duplicate_policy: config.duplicate_policy,
            time_window_raster_ms: config.time_window_raster_ms as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    operation: &'static str,
    keys: Vec<SeriesKey>,
}

#[derive(Debug, Clone)]
enum MemoValue {
    Series(Arc<[KeyedSample]>),
    Mask(Option<TimeMask>),
}

#[derive(Debug)]
struct MemoEntry {
    computed_at: u64,
    value: MemoValue,
}

#[derive(Debug, Default)]
struct Memo {
    entries: AHashMap<MemoKey, MemoEntry>,
    hits: u64,
    misses: u64,
}

/// Line-by-key mutation bookkeeping for one update.
#[derive(Default)]
struct Touched {
    order: Vec<SeriesKey>,
    last_before: AHashMap<SeriesKey, Option<Sample>>,
}

impl Touched {
    fn record(&mut self, key: &SeriesKey, last: Option<Sample>) {
        if !self.last_before.contains_key(key) {
            self.last_before.insert(Arc::clone(key), last);
            self.order.push(Arc::clone(key));
        }
    }
}

#[derive(Debug)]
pub struct TimeSeriesStore {
    lines: AHashMap<SeriesKey, Vec<Sample>>,
    changed_at: AHashMap<SeriesKey, u64>,
    generation: u64,
    cleared_at: u64,
    retention_changed_at: u64,
    retention_ms: f64,
    last_window: Option<MinAndMax>,
    options: StoreOptions,
    stats: StoreStats,
    memo: Mutex<Memo>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<Arc<ChangeEvent>>,
}

impl TimeSeriesStore {
    pub fn new(options: StoreOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: StoreOptions, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            lines: AHashMap::new(),
            changed_at: AHashMap::new(),
            generation: 0,
            cleared_at: 0,
            retention_changed_at: 0,
            retention_ms: f64::INFINITY,
            last_window: None,
            options,
            stats: StoreStats::default(),
            memo: Mutex::new(Memo::default()),
            clock,
            events,
        }
    }

    /// Build a store from configuration, applying its retention.
    pub fn from_config(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut store = Self::with_clock(StoreOptions::from(config), clock);
        store.set_retention(config.retention)?;
        Ok(store)
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.events.subscribe()
    }

    /// Merge samples into their lines, or clear everything on `None`.
    ///
    /// Lines stay sorted by time. A batch whose earliest sample is not older
    /// than the line's newest is appended; otherwise the line is stably
    /// re-sorted, so equal times keep insertion order. Samples with a
    /// non-finite time are ignored.
    pub fn update_data(&mut self, data: Option<Vec<KeyedSample>>) -> Arc<ChangeEvent> {
        self.generation += 1;
        let generation = self.generation;
        let mut touched = Touched::default();

        match data {
            None => {
                for (key, line) in self.lines.iter() {
                    touched.record(key, line.last().copied());
                }
                for key in &touched.order {
                    self.changed_at.insert(Arc::clone(key), generation);
                }
                self.lines.clear();
                self.cleared_at = generation;
                self.memo.lock().entries.clear();
                debug!(keys = touched.order.len(), "store cleared");
            },
            Some(samples) => {
                for (key, mut incoming) in group_by_key(samples) {
                    incoming.sort_by(|a, b| a.time.total_cmp(&b.time));
                    let line = self.lines.entry(Arc::clone(&key)).or_default();
                    touched.record(&key, line.last().copied());
                    merge_line(line, incoming, self.options.duplicate_policy, &mut self.stats);
                    self.changed_at.insert(key, generation);
                }
            },
        }

        self.trim_to_window(&mut touched);
        let time_window_changed = self.refresh_window();
        self.emit(touched, false, time_window_changed)
    }

    /// Set the retention window in milliseconds. `0` or infinity keeps
    /// everything; negative or NaN is rejected.
    pub fn set_retention_time_ms(&mut self, retention_ms: f64) -> Result<Arc<ChangeEvent>> {
        if retention_ms.is_nan() || retention_ms < 0.0 {
            return Err(PulseError::invalid_argument(format!(
                "retention must be a non-negative number of milliseconds, got {retention_ms}"
            )));
        }

        self.generation += 1;
        self.retention_changed_at = self.generation;
        self.retention_ms = retention_ms;
        debug!(retention_ms, "retention changed");

        let mut touched = Touched::default();
        self.trim_to_window(&mut touched);
        let time_window_changed = self.refresh_window();
        Ok(self.emit(touched, true, time_window_changed))
    }

    pub fn set_retention(&mut self, retention: Option<Duration>) -> Result<Arc<ChangeEvent>> {
        let retention_ms = retention.map_or(f64::INFINITY, |d| d.as_secs_f64() * 1000.0);
        self.set_retention_time_ms(retention_ms)
    }

    pub fn retention_time_ms(&self) -> f64 {
        self.retention_ms
    }

    /// Whether a sliding window is active.
    pub fn retention_used(&self) -> bool {
        self.retention_ms.is_finite() && self.retention_ms > 0.0
    }

    /// Slide the window to the current time and drop what fell out of it.
    ///
    /// Returns `None` when nothing was trimmed and the window did not move.
    pub fn apply_retention(&mut self) -> Option<Arc<ChangeEvent>> {
        if !self.retention_used() {
            return None;
        }

        self.generation += 1;
        let mut touched = Touched::default();
        self.trim_to_window(&mut touched);
        let time_window_changed = self.refresh_window();
        if touched.order.is_empty() && !time_window_changed {
            return None;
        }
        Some(self.emit(touched, false, time_window_changed))
    }

    /// Unrasterized `(now - retention, now)`.
    pub fn live_time_window(&self) -> Option<MinAndMax> {
        if !self.retention_used() {
            return None;
        }
        let now = self.clock.now_ms();
        Some(MinAndMax::new(now - self.retention_ms, now))
    }

    /// Retention window with edges snapped outward to the raster.
    pub fn time_window(&self) -> Option<MinAndMax> {
        let live = self.live_time_window()?;
        let raster = self.options.time_window_raster_ms;
        if raster > 0.0 {
            Some(MinAndMax::new(
                (live.min / raster).floor() * raster,
                (live.max / raster).ceil() * raster,
            ))
        } else {
            Some(live)
        }
    }

    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<_> = self.lines.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn line(&self, key: &str) -> Option<&[Sample]> {
        self.lines.get(key).map(Vec::as_slice)
    }

    /// Number of series held
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.lines.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> StoreStats {
        let memo = self.memo.lock();
        StoreStats {
            cache_hits: memo.hits,
            cache_misses: memo.misses,
            generation: self.generation,
            ..self.stats
        }
    }

    /// Render data for `keys`: each key simplified on its own, then merged
    /// and stably ordered by time.
    pub fn calculate_simplified_data<K: AsRef<str>>(&self, keys: &[K]) -> Arc<[KeyedSample]> {
        let memo_key = self.memo_key(OP_SIMPLIFIED, keys);
        if memo_key.keys.is_empty() {
            return Arc::from(Vec::new());
        }
        if let Some(MemoValue::Series(series)) = self.memo_get(&memo_key) {
            return series;
        }

        let series: Arc<[KeyedSample]> = if let [key] = memo_key.keys.as_slice() {
            self.simplify_line(key).into()
        } else {
            let mut merged: Vec<KeyedSample> = memo_key
                .keys
                .iter()
                .flat_map(|key| self.calculate_simplified_data(&[key]).iter().cloned().collect::<Vec<_>>())
                .collect();
            merged.sort_by(|a, b| a.time.total_cmp(&b.time));
            merged.into()
        };

        self.memo_put(memo_key, MemoValue::Series(Arc::clone(&series)));
        series
    }

    /// Earliest and latest time across `keys`.
    pub fn get_data_time_min_max<K: AsRef<str>>(&self, keys: &[K]) -> Option<MinAndMax> {
        MinAndMax::merge(keys.iter().map(|key| {
            let line = self.lines.get(key.as_ref())?;
            Some(MinAndMax::new(line.first()?.time, line.last()?.time))
        }))
    }

    /// Newest sample across `keys`; on equal times the earlier key wins.
    pub fn get_latest_data_point<K: AsRef<str>>(&self, keys: &[K]) -> Option<KeyedSample> {
        let mut latest: Option<(&SeriesKey, Sample)> = None;
        for key in keys {
            let Some((key, line)) = self.lines.get_key_value(key.as_ref()) else {
                continue;
            };
            let Some(last) = line.last() else {
                continue;
            };
            if latest.map_or(true, |(_, best)| last.time > best.time) {
                latest = Some((key, *last));
            }
        }
        latest.map(|(key, sample)| KeyedSample {
            key: Arc::clone(key),
            time: sample.time,
            value: sample.value,
        })
    }

    /// Label granularity for the data span of `keys`.
    pub fn get_mask<K: AsRef<str>>(&self, keys: &[K]) -> Option<TimeMask> {
        let memo_key = self.memo_key(OP_MASK, keys);
        if let Some(MemoValue::Mask(mask)) = self.memo_get(&memo_key) {
            return mask;
        }
        let mask = self.get_data_time_min_max(keys).map(TimeMask::for_range);
        self.memo_put(memo_key, MemoValue::Mask(mask));
        mask
    }

    /// Drop all data.
    pub fn clear(&mut self) -> Arc<ChangeEvent> {
        self.update_data(None)
    }

    fn simplify_line(&self, key: &SeriesKey) -> Vec<KeyedSample> {
        let Some(line) = self.lines.get(key) else {
            return Vec::new();
        };
        simplify_to_max_points(line, self.options.simplify)
            .into_iter()
            .map(|sample| KeyedSample {
                key: Arc::clone(key),
                time: sample.time,
                value: sample.value,
            })
            .collect()
    }

    fn memo_key<K: AsRef<str>>(&self, operation: &'static str, keys: &[K]) -> MemoKey {
        let mut keys: Vec<SeriesKey> = keys
            .iter()
            .map(|key| {
                let key = key.as_ref();
                self.lines
                    .get_key_value(key)
                    .map_or_else(|| SeriesKey::from(key), |(k, _)| Arc::clone(k))
            })
            .collect();
        keys.sort();
        keys.dedup();
        MemoKey { operation, keys }
    }

    /// Generation at which anything `keys` depends on last changed.
    fn stamp(&self, keys: &[SeriesKey]) -> u64 {
        keys.iter()
            .filter_map(|key| self.changed_at.get(key).copied())
            .fold(self.cleared_at.max(self.retention_changed_at), u64::max)
    }

    fn memo_get(&self, key: &MemoKey) -> Option<MemoValue> {
        let stamp = self.stamp(&key.keys);
        let mut memo = self.memo.lock();
        let value = memo
            .entries
            .get(key)
            .filter(|entry| entry.computed_at >= stamp)
            .map(|entry| entry.value.clone());
        match value {
            Some(_) => memo.hits += 1,
            None => memo.misses += 1,
        }
        value
    }

    fn memo_put(&self, key: MemoKey, value: MemoValue) {
        let entry = MemoEntry {
            computed_at: self.generation,
            value,
        };
        self.memo.lock().entries.insert(key, entry);
    }

    fn trim_to_window(&mut self, touched: &mut Touched) {
        let Some(window) = self.time_window() else {
            return;
        };

        let generation = self.generation;
        let mut trimmed = 0u64;
        for (key, line) in self.lines.iter_mut() {
            let cut = line.partition_point(|sample| sample.time < window.min);
            if cut == 0 {
                continue;
            }
            touched.record(key, line.last().copied());
            line.drain(..cut);
            self.changed_at.insert(Arc::clone(key), generation);
            trimmed += cut as u64;
        }

        if trimmed > 0 {
            self.lines.retain(|_, line| !line.is_empty());
            self.stats.trimmed_samples += trimmed;
            trace!(trimmed, window_min = window.min, "retention trimmed samples");
        }
    }

    fn refresh_window(&mut self) -> bool {
        let window = self.time_window();
        let changed = window != self.last_window;
        self.last_window = window;
        changed
    }

    fn emit(&self, touched: Touched, retention_changed: bool, time_window_changed: bool) -> Arc<ChangeEvent> {
        let last_value_changed_keys = touched
            .order
            .iter()
            .filter(|key| {
                let now = self.lines.get(*key).and_then(|line| line.last().copied());
                touched.last_before.get(*key).copied().flatten() != now
            })
            .cloned()
            .collect();

        let event = Arc::new(ChangeEvent {
            changed_keys: touched.order,
            last_value_changed_keys,
            retention_changed,
            time_window_changed,
        });

        if !event.is_empty() {
            // No receivers is fine.
            let _ = self.events.send(Arc::clone(&event));
        }
        event
    }
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

/// Split samples by key, keeping first-seen key order and per-key order.
fn group_by_key(samples: Vec<KeyedSample>) -> Vec<(SeriesKey, Vec<Sample>)> {
    let mut index: AHashMap<SeriesKey, usize> = AHashMap::new();
    let mut groups: Vec<(SeriesKey, Vec<Sample>)> = Vec::new();
    let mut skipped = 0usize;

    for sample in samples {
        if !sample.time.is_finite() {
            skipped += 1;
            continue;
        }
        let slot = *index.entry(Arc::clone(&sample.key)).or_insert_with(|| {
            groups.push((Arc::clone(&sample.key), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(sample.sample());
    }

    if skipped > 0 {
        trace!(skipped, "ignored samples with non-finite time");
    }
    groups
}

fn merge_line(line: &mut Vec<Sample>, incoming: Vec<Sample>, policy: DuplicatePolicy, stats: &mut StoreStats) {
    let Some(first) = incoming.first() else {
        return;
    };
    let overlapping = line.last().is_some_and(|last| first.time < last.time);
    let dedup_from = if overlapping {
        0
    } else {
        line.len().saturating_sub(1)
    };

    line.extend(incoming);
    if overlapping {
        line.sort_by(|a, b| a.time.total_cmp(&b.time));
        stats.full_sorts += 1;
    } else {
        stats.fast_appends += 1;
    }

    if policy == DuplicatePolicy::ReplaceOnEqualTime {
        stats.replaced_samples += dedup_keep_last(line, dedup_from) as u64;
    }
}

/// Collapse runs of equal time starting at `from`, keeping the last of each run.
fn dedup_keep_last(line: &mut Vec<Sample>, from: usize) -> usize {
    let len = line.len();
    let mut write = from;
    for read in from..len {
        if write > from && line[write - 1].time == line[read].time {
            line[write - 1] = line[read];
        } else {
            line[write] = line[read];
            write += 1;
        }
    }
    line.truncate(write);
    len - write
}
