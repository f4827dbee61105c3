use chrono::{DateTime, Utc};
use core_types::{Bar, Timeframe};
use indicators::{IndicatorError, IndicatorKind, IndicatorSeries, IndicatorSettings, compute};
use std::collections::HashMap;
use std::sync::Arc;

/// Cache key: one indicator instance on one frame at one bar close.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Stable indicator identity, e.g. `rsi(14)` or `macd(12,26,9)`.
    pub indicator_id: String,
    pub bar_close: DateTime<Utc>,
}

/// The shared indicator cache.
///
/// Entries are keyed by `(symbol, timeframe, indicator, settings,
/// bar_close_time)`, so a value computed for one fingerprint serves every
/// other fingerprint on the same frame within the same bar. Entries from
/// older bars are pruned at the start of each cycle (TTL of one bar).
///
/// Writes happen only during a cycle's build phase with a single writer;
/// readers get cheap `Arc` clones of immutable series.
#[derive(Default)]
pub struct IndicatorCache {
    map: HashMap<CacheKey, Arc<IndicatorSeries>>,
    pub hits: u64,
    pub misses: u64,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached series for the key, computing it from `bars`
    /// (closed bars only) on first use within the bar.
    pub fn get_or_compute(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        kind: IndicatorKind,
        settings: &IndicatorSettings,
        bar_close: DateTime<Utc>,
        bars: &[Bar],
    ) -> Result<Arc<IndicatorSeries>, IndicatorError> {
        let key = CacheKey {
            symbol: symbol.to_string(),
            timeframe,
            indicator_id: settings.cache_id(kind),
            bar_close,
        };

        if let Some(series) = self.map.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(series));
        }

        self.misses += 1;
        let series = Arc::new(compute(kind, settings, bars)?);
        self.map.insert(key, Arc::clone(&series));
        Ok(series)
    }

    /// Drops entries whose bar has rolled over (the one-bar TTL).
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.map
            .retain(|key, _| now - key.bar_close < key.timeframe.duration() * 2);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let open_time = start + Duration::hours(i as i64);
                let px = Decimal::from(100 + i as i64);
                Bar {
                    open_time,
                    open: px,
                    high: px,
                    low: px,
                    close: px,
                    volume: Decimal::from(1000),
                    close_time: open_time + Duration::hours(1),
                }
            })
            .collect()
    }

    #[test]
    fn second_lookup_is_a_hit() {
        let mut cache = IndicatorCache::new();
        let bars = bars(40);
        let close = bars.last().unwrap().close_time;
        let settings = IndicatorSettings::default();

        cache
            .get_or_compute("BTCUSDT", Timeframe::H1, IndicatorKind::Rsi, &settings, close, &bars)
            .unwrap();
        cache
            .get_or_compute("BTCUSDT", Timeframe::H1, IndicatorKind::Rsi, &settings, close, &bars)
            .unwrap();

        assert_eq!(cache.misses, 1);
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn settings_split_the_key() {
        let mut cache = IndicatorCache::new();
        let bars = bars(60);
        let close = bars.last().unwrap().close_time;

        let mut fourteen = IndicatorSettings::default();
        fourteen.period = 14;
        let mut twenty_one = IndicatorSettings::default();
        twenty_one.period = 21;

        cache
            .get_or_compute("BTCUSDT", Timeframe::H1, IndicatorKind::Rsi, &fourteen, close, &bars)
            .unwrap();
        cache
            .get_or_compute("BTCUSDT", Timeframe::H1, IndicatorKind::Rsi, &twenty_one, close, &bars)
            .unwrap();

        assert_eq!(cache.misses, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn prune_expires_old_bars() {
        let mut cache = IndicatorCache::new();
        let bars = bars(40);
        let close = bars.last().unwrap().close_time;
        let settings = IndicatorSettings::default();

        cache
            .get_or_compute("BTCUSDT", Timeframe::H1, IndicatorKind::Rsi, &settings, close, &bars)
            .unwrap();

        // Still inside the bar: survives.
        cache.prune(close + Duration::minutes(30));
        assert_eq!(cache.len(), 1);

        // Two bars later: expired.
        cache.prune(close + Duration::hours(3));
        assert!(cache.is_empty());
    }
}
