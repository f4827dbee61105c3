//! # Stratum Indicator Kernel
//!
//! Pure, deterministic indicator computation over ordered OHLCV bars. Given
//! a named indicator and its settings, the kernel produces the full series
//! for every component plus easy access to the tail values the evaluator
//! compares against.
//!
//! ## Architectural Principles
//!
//! - **Purity:** No I/O, no clocks, no shared state. The same bars and
//!   settings always produce the same series, which is what makes the
//!   evaluator's per-cycle cache sound.
//! - **Whole-series output:** Cross and chain operators need the previous
//!   bar's value as well as the current one, so every computation returns
//!   the series aligned to the end of the input bars rather than a single
//!   scalar.
//! - **Explicit warm-up:** Fewer than the indicator's minimum bars is a
//!   typed `InsufficientHistory` error, not a zero or a NaN. Callers treat
//!   it as "indeterminate": not triggered, and not counted as evaluated.
//!
//! Prices live as `rust_decimal::Decimal` in the rest of the system;
//! indicator mathematics runs in `f64` behind this crate's boundary, a
//! controlled precision trade-off at a well-defined seam.

pub mod error;
pub mod kind;
pub mod patterns;
pub mod series;

pub use error::IndicatorError;
pub use kind::{IndicatorKind, IndicatorSettings, IndicatorSeries, compute, resolve_kind};
pub use patterns::CandlePattern;

use core_types::Bar;
use rust_decimal::prelude::ToPrimitive;

/// Converts one Decimal field to `f64`, surfacing overflow as a typed error
/// instead of a silent NaN.
pub(crate) fn to_f64(value: rust_decimal::Decimal, field: &str) -> Result<f64, IndicatorError> {
    value
        .to_f64()
        .ok_or_else(|| IndicatorError::Numeric(field.to_string()))
}

/// Extracts the close series from bars.
pub fn closes(bars: &[Bar]) -> Result<Vec<f64>, IndicatorError> {
    bars.iter().map(|b| to_f64(b.close, "close")).collect()
}

/// Extracts the volume series from bars.
pub fn volumes(bars: &[Bar]) -> Result<Vec<f64>, IndicatorError> {
    bars.iter().map(|b| to_f64(b.volume, "volume")).collect()
}

pub(crate) fn highs(bars: &[Bar]) -> Result<Vec<f64>, IndicatorError> {
    bars.iter().map(|b| to_f64(b.high, "high")).collect()
}

pub(crate) fn lows(bars: &[Bar]) -> Result<Vec<f64>, IndicatorError> {
    bars.iter().map(|b| to_f64(b.low, "low")).collect()
}
