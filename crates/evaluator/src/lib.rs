//! # Stratum Shared Evaluator
//!
//! The evaluation loop at the heart of the engine. One iteration is a
//! *cycle*: snapshot the active fingerprints, fetch each (symbol,
//! timeframe) frame exactly once, compute each required indicator once
//! into the shared cache, evaluate every condition's tail, and publish
//! trigger events — at most one per `(fingerprint, bar_close_time)`.
//!
//! ## Firing discipline
//!
//! Debounce state is not in-memory-only: before emitting, the evaluator
//! consults the condition record's persisted `last_triggered_at`, so a
//! process restart can never double-fire a bar.
//!
//! ## Error policy
//!
//! The cycle never aborts globally. A failed market-data fetch skips its
//! frame (those fingerprints are not marked evaluated); a malformed or
//! erroring condition is counted in metrics and skipped. Cycles are
//! numbered and never overlap.

pub mod cache;
pub mod error;
pub mod eval;
pub mod metrics;
pub mod playbook_state;

pub use cache::IndicatorCache;
pub use error::EvaluatorError;
pub use eval::Outcome;
pub use metrics::{EvaluatorMetrics, MetricsSnapshot};

use api_client::MarketData;
use chrono::{DateTime, Utc};
use conditions::{CanonicalCondition, CanonicalPlaybook, ConditionStore, chain, gate_result};
use configuration::EngineSettings;
use core_types::{Bar, ConditionRecord, Timeframe, TriggerEvent};
use event_bus::EventBus;
use futures::future::join_all;
use playbook_state::PlaybookTracker;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use uuid::Uuid;

/// What one cycle did, for the log line and for tests.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub cycle: u64,
    pub evaluated: usize,
    pub triggered: usize,
    pub frames_fetched: usize,
    pub frames_skipped: usize,
    pub indeterminate: usize,
    pub errors: usize,
}

enum ParsedBody {
    Atomic(CanonicalCondition),
    Playbook(CanonicalPlaybook),
}

/// The shared evaluator. One instance runs on one dedicated task; all of
/// its mutable state (cache, playbook trackers, fallback-warned set) is
/// owned here, not in globals.
pub struct SharedEvaluator {
    store: Arc<dyn ConditionStore>,
    market: Arc<dyn MarketData>,
    bus: EventBus,
    settings: EngineSettings,
    cache: IndicatorCache,
    playbooks: HashMap<String, PlaybookTracker>,
    fallback_warned: HashSet<String>,
    metrics: Arc<EvaluatorMetrics>,
    cycle: u64,
    shortest_frame: Option<Timeframe>,
}

impl SharedEvaluator {
    pub fn new(
        store: Arc<dyn ConditionStore>,
        market: Arc<dyn MarketData>,
        bus: EventBus,
        settings: EngineSettings,
        metrics: Arc<EvaluatorMetrics>,
    ) -> Self {
        Self {
            store,
            market,
            bus,
            settings,
            cache: IndicatorCache::new(),
            playbooks: HashMap::new(),
            fallback_warned: HashSet::new(),
            metrics,
            cycle: 0,
            shortest_frame: None,
        }
    }

    /// Drives cycles until shutdown. A new cycle does not begin until the
    /// prior one completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(cycle_secs = self.settings.cycle_secs, "shared evaluator started");
        loop {
            match self.run_cycle().await {
                Ok(summary) => {
                    tracing::debug!(
                        cycle = summary.cycle,
                        evaluated = summary.evaluated,
                        triggered = summary.triggered,
                        frames = summary.frames_fetched,
                        skipped = summary.frames_skipped,
                        "cycle complete"
                    );
                }
                Err(e) => {
                    // A cycle-level failure (e.g. the subscription scan) is
                    // transient by contract; the next cycle retries it.
                    tracing::warn!(error = %e, "evaluation cycle failed");
                }
            }

            let pause = self.next_pause(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shared evaluator stopping");
                        return;
                    }
                }
            }
        }
    }

    /// How long to sleep before the next cycle: the configured period, or
    /// — when a watched timeframe is shorter than the period — until just
    /// past that frame's next bar close.
    fn next_pause(&self, now: DateTime<Utc>) -> StdDuration {
        let base = StdDuration::from_secs(self.settings.cycle_secs);
        if let Some(tf) = self.shortest_frame {
            if tf.duration().num_seconds() < self.settings.cycle_secs as i64 {
                let next_close = tf.next_close_after(now);
                let until = (next_close - now).num_milliseconds().max(0) as u64;
                // Small jitter past the boundary so the exchange has
                // sealed the bar before we fetch it.
                return StdDuration::from_millis(until + 500);
            }
        }
        base
    }

    pub fn metrics(&self) -> Arc<EvaluatorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs one full evaluation cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, EvaluatorError> {
        self.cycle += 1;
        let now = Utc::now();
        self.cache.prune(now);

        let mut summary = CycleSummary { cycle: self.cycle, ..Default::default() };

        // 1. Snapshot the active set.
        let records = self.store.active_conditions().await?;
        if records.is_empty() {
            self.metrics.cycles.fetch_add(1, Ordering::Relaxed);
            return Ok(summary);
        }

        // 2. Parse bodies and resolve playbook items into the atomic set.
        let mut atomics: BTreeMap<String, CanonicalCondition> = BTreeMap::new();
        let mut singles: Vec<ConditionRecord> = Vec::new();
        let mut playbooks: Vec<(ConditionRecord, CanonicalPlaybook)> = Vec::new();

        for record in records {
            match self.parse_record(&record).await {
                Ok(ParsedBody::Atomic(condition)) => {
                    atomics.insert(record.fingerprint.clone(), condition);
                    singles.push(record);
                }
                Ok(ParsedBody::Playbook(playbook)) => {
                    for item in &playbook.items {
                        if atomics.contains_key(&item.fingerprint) {
                            continue;
                        }
                        match self.resolve_item(&item.fingerprint).await {
                            Some(condition) => {
                                atomics.insert(item.fingerprint.clone(), condition);
                            }
                            None => {
                                tracing::warn!(
                                    playbook = %record.fingerprint,
                                    item = %item.fingerprint,
                                    "playbook item condition missing from store"
                                );
                                summary.errors += 1;
                            }
                        }
                    }
                    playbooks.push((record, playbook));
                }
                Err(e) => {
                    tracing::warn!(fingerprint = %record.fingerprint, error = %e, "skipping malformed condition");
                    summary.errors += 1;
                }
            }
        }

        // 3. Fetch each frame exactly once, concurrently, under timeout.
        let frames: BTreeSet<(String, Timeframe)> = atomics
            .values()
            .map(|c| (c.symbol.clone(), c.timeframe))
            .collect();
        self.shortest_frame = frames.iter().map(|(_, tf)| *tf).min();
        let fetched = self.fetch_frames(&frames, &mut summary).await;

        // 4. Evaluate every atomic condition once, in fingerprint order.
        let mut outcomes: BTreeMap<String, Outcome> = BTreeMap::new();
        let mut evaluated: Vec<String> = Vec::new();
        for (fingerprint, condition) in &atomics {
            let frame = (condition.symbol.clone(), condition.timeframe);
            let bars = match fetched.get(&frame) {
                Some(bars) => bars,
                None => continue, // frame skipped this cycle
            };
            match eval::evaluate_atomic(
                fingerprint,
                condition,
                bars,
                &mut self.cache,
                &mut self.fallback_warned,
            ) {
                Ok(outcome) => {
                    if outcome.is_determinate() {
                        evaluated.push(fingerprint.clone());
                    } else {
                        summary.indeterminate += 1;
                        self.metrics.indeterminate.fetch_add(1, Ordering::Relaxed);
                    }
                    outcomes.insert(fingerprint.clone(), outcome);
                }
                Err(e) => {
                    tracing::warn!(fingerprint = %fingerprint, error = %e, "condition evaluation failed");
                    summary.errors += 1;
                    self.metrics.eval_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // 5. Collect triggers: subscribed singles first, then playbooks.
        let mut triggers: Vec<TriggerEvent> = Vec::new();

        for record in &singles {
            let outcome = match outcomes.get(&record.fingerprint) {
                Some(outcome) => outcome,
                None => continue,
            };
            if let Outcome::True(values) = outcome {
                let frame = (record.symbol.clone(), record.timeframe);
                let bar_close = match frame_close(&fetched, &frame) {
                    Some(t) => t,
                    None => continue,
                };
                if debounced(record, bar_close) {
                    continue;
                }
                triggers.push(self.make_event(record, bar_close, now, values.clone()));
            }
        }

        for (record, playbook) in &playbooks {
            let wrapper_frame = (record.symbol.clone(), record.timeframe);
            let wrapper_close = match frame_close(&fetched, &wrapper_frame) {
                Some(t) => t,
                None => continue, // primary frame skipped: wrapper not evaluated
            };

            let tracker = self
                .playbooks
                .entry(record.fingerprint.clone())
                .or_insert_with(|| PlaybookTracker::new(playbook.items.len()));

            let mut chain_input: Vec<(conditions::Logic, bool)> = Vec::new();
            let mut any_true = false;
            let mut merged_values: BTreeMap<String, f64> = BTreeMap::new();

            for (idx, item) in playbook.items.iter().enumerate() {
                let item_condition = atomics.get(&item.fingerprint);
                let (item_tf, item_close) = match item_condition {
                    Some(c) => {
                        let frame = (c.symbol.clone(), c.timeframe);
                        match frame_close(&fetched, &frame) {
                            Some(t) => (c.timeframe, t),
                            None => (c.timeframe, wrapper_close),
                        }
                    }
                    None => (record.timeframe, wrapper_close),
                };

                let truth = if tracker.within_validity(idx, item.validity, item_tf, item_close, now)
                {
                    true
                } else {
                    match outcomes.get(&item.fingerprint) {
                        Some(Outcome::True(values)) => {
                            tracker.stamp(idx, item_close, now);
                            for (k, v) in values {
                                merged_values.entry(k.clone()).or_insert(*v);
                            }
                            true
                        }
                        Some(Outcome::False) => {
                            tracker.clear(idx);
                            false
                        }
                        _ => false, // indeterminate or frame-skipped
                    }
                };
                any_true |= truth;
                chain_input.push((item.logic, truth));
            }

            evaluated.push(record.fingerprint.clone());

            let fired = gate_result(playbook.gate, chain(&chain_input), any_true);
            if fired && !debounced(record, wrapper_close) {
                triggers.push(self.make_event(record, wrapper_close, now, merged_values));
            }
        }

        // 6. Publish in deterministic order within each frame, then stamp
        // the stats. Debounce stamps land before evaluation stamps so the
        // `last_triggered_at <= last_evaluated_at` invariant holds even
        // mid-cycle.
        triggers.sort_by(|a, b| {
            (a.symbol.as_str(), a.timeframe, a.fingerprint.as_str()).cmp(&(
                b.symbol.as_str(),
                b.timeframe,
                b.fingerprint.as_str(),
            ))
        });

        for event in &triggers {
            self.store
                .mark_triggered(&event.fingerprint, event.bar_close_time)
                .await?;
            let reached = self.bus.publish(&event.topic(), event);
            tracing::info!(
                fingerprint = %event.fingerprint,
                symbol = %event.symbol,
                timeframe = %event.timeframe,
                bar_close = %event.bar_close_time,
                subscribers = reached,
                "condition triggered"
            );
        }

        self.store.mark_evaluated(&evaluated, Utc::now()).await?;

        summary.evaluated = evaluated.len();
        summary.triggered = triggers.len();
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .fingerprints_evaluated
            .fetch_add(evaluated.len() as u64, Ordering::Relaxed);
        self.metrics
            .triggers_emitted
            .fetch_add(triggers.len() as u64, Ordering::Relaxed);

        Ok(summary)
    }

    async fn parse_record(&self, record: &ConditionRecord) -> Result<ParsedBody, EvaluatorError> {
        if record.condition_type == "playbook" {
            let playbook: CanonicalPlaybook = serde_json::from_value(record.config.clone())
                .map_err(|e| EvaluatorError::MalformedCondition {
                    fingerprint: record.fingerprint.clone(),
                    reason: e.to_string(),
                })?;
            Ok(ParsedBody::Playbook(playbook))
        } else {
            let condition: CanonicalCondition = serde_json::from_value(record.config.clone())
                .map_err(|e| EvaluatorError::MalformedCondition {
                    fingerprint: record.fingerprint.clone(),
                    reason: e.to_string(),
                })?;
            Ok(ParsedBody::Atomic(condition))
        }
    }

    async fn resolve_item(&self, fingerprint: &str) -> Option<CanonicalCondition> {
        let record = self.store.get_condition(fingerprint).await.ok()??;
        serde_json::from_value(record.config).ok()
    }

    /// Fetches every frame once, concurrently, dropping the forming bar.
    async fn fetch_frames(
        &self,
        frames: &BTreeSet<(String, Timeframe)>,
        summary: &mut CycleSummary,
    ) -> HashMap<(String, Timeframe), Vec<Bar>> {
        let timeout = StdDuration::from_secs(self.settings.market_data_timeout_secs);
        let limit = self.settings.kline_limit;

        let futures = frames.iter().map(|(symbol, tf)| {
            let market = Arc::clone(&self.market);
            let symbol = symbol.clone();
            let tf = *tf;
            async move {
                let result =
                    tokio::time::timeout(timeout, market.get_klines(&symbol, tf, limit)).await;
                ((symbol, tf), result)
            }
        });

        let mut fetched = HashMap::new();
        for ((symbol, tf), result) in join_all(futures).await {
            match result {
                Ok(Ok(mut bars)) => {
                    // The final bar is still forming; evaluation only sees
                    // closed bars.
                    bars.pop();
                    if bars.is_empty() {
                        summary.frames_skipped += 1;
                        self.metrics.groups_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    summary.frames_fetched += 1;
                    self.metrics.groups_fetched.fetch_add(1, Ordering::Relaxed);
                    fetched.insert((symbol, tf), bars);
                }
                Ok(Err(e)) => {
                    tracing::warn!(symbol = %symbol, timeframe = %tf, error = %e, "market data fetch failed, skipping frame");
                    summary.frames_skipped += 1;
                    self.metrics.groups_skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(_elapsed) => {
                    tracing::warn!(symbol = %symbol, timeframe = %tf, "market data fetch timed out, skipping frame");
                    summary.frames_skipped += 1;
                    self.metrics.groups_skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        fetched
    }

    fn make_event(
        &self,
        record: &ConditionRecord,
        bar_close: DateTime<Utc>,
        now: DateTime<Utc>,
        values: BTreeMap<String, f64>,
    ) -> TriggerEvent {
        TriggerEvent {
            event_id: Uuid::new_v4(),
            fingerprint: record.fingerprint.clone(),
            symbol: record.symbol.clone(),
            timeframe: record.timeframe,
            triggered_at: now,
            bar_close_time: bar_close,
            values,
        }
    }
}

fn frame_close(
    fetched: &HashMap<(String, Timeframe), Vec<Bar>>,
    frame: &(String, Timeframe),
) -> Option<DateTime<Utc>> {
    fetched.get(frame).and_then(|bars| bars.last()).map(|b| b.close_time)
}

/// One trigger per `(fingerprint, bar_close_time)`: skip when the record
/// already triggered at (or after) this bar.
fn debounced(record: &ConditionRecord, bar_close: DateTime<Utc>) -> bool {
    matches!(record.last_triggered_at, Some(t) if t >= bar_close)
}
