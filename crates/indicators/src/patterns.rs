//! Candlestick pattern predicates over the last two closed bars. All
//! comparisons run on exact `Decimal` values; no float rounding is involved
//! in pattern truth.

use crate::error::IndicatorError;
use core_types::Bar;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    InsideBar,
    OutsideBar,
    BullishEngulfing,
    BearishEngulfing,
    Doji,
    Hammer,
    GapUp,
    GapDown,
    HigherHigh,
    HigherLow,
    LowerHigh,
    LowerLow,
}

impl CandlePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandlePattern::InsideBar => "inside_bar",
            CandlePattern::OutsideBar => "outside_bar",
            CandlePattern::BullishEngulfing => "bullish_engulfing",
            CandlePattern::BearishEngulfing => "bearish_engulfing",
            CandlePattern::Doji => "doji",
            CandlePattern::Hammer => "hammer",
            CandlePattern::GapUp => "gap_up",
            CandlePattern::GapDown => "gap_down",
            CandlePattern::HigherHigh => "higher_high",
            CandlePattern::HigherLow => "higher_low",
            CandlePattern::LowerHigh => "lower_high",
            CandlePattern::LowerLow => "lower_low",
        }
    }
}

impl FromStr for CandlePattern {
    type Err = IndicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inside_bar" => Ok(CandlePattern::InsideBar),
            "outside_bar" => Ok(CandlePattern::OutsideBar),
            "bullish_engulfing" => Ok(CandlePattern::BullishEngulfing),
            "bearish_engulfing" => Ok(CandlePattern::BearishEngulfing),
            "doji" => Ok(CandlePattern::Doji),
            "hammer" => Ok(CandlePattern::Hammer),
            "gap_up" => Ok(CandlePattern::GapUp),
            "gap_down" => Ok(CandlePattern::GapDown),
            "higher_high" => Ok(CandlePattern::HigherHigh),
            "higher_low" => Ok(CandlePattern::HigherLow),
            "lower_high" => Ok(CandlePattern::LowerHigh),
            "lower_low" => Ok(CandlePattern::LowerLow),
            other => Err(IndicatorError::UnknownPattern(other.to_string())),
        }
    }
}

/// Evaluates a pattern on `(prev, curr)`, the last two closed bars.
pub fn detect(pattern: CandlePattern, prev: &Bar, curr: &Bar) -> bool {
    match pattern {
        CandlePattern::InsideBar => curr.high <= prev.high && curr.low >= prev.low,
        CandlePattern::OutsideBar => curr.high >= prev.high && curr.low <= prev.low,
        CandlePattern::BullishEngulfing => {
            prev.close < prev.open
                && curr.close > curr.open
                && curr.open < prev.close
                && curr.close > prev.open
        }
        CandlePattern::BearishEngulfing => {
            prev.close > prev.open
                && curr.close < curr.open
                && curr.open > prev.close
                && curr.close < prev.open
        }
        CandlePattern::Doji => {
            let range = curr.high - curr.low;
            range > Decimal::ZERO && (curr.open - curr.close).abs() / range < dec!(0.1)
        }
        CandlePattern::Hammer => {
            let body = (curr.close - curr.open).abs();
            let lower_wick = curr.open.min(curr.close) - curr.low;
            let upper_wick = curr.high - curr.open.max(curr.close);
            lower_wick > body * dec!(2) && upper_wick < body * dec!(0.5)
        }
        CandlePattern::GapUp => curr.open > prev.high,
        CandlePattern::GapDown => curr.open < prev.low,
        CandlePattern::HigherHigh => curr.high > prev.high,
        CandlePattern::HigherLow => curr.low > prev.low,
        CandlePattern::LowerHigh => curr.high < prev.high,
        CandlePattern::LowerLow => curr.low < prev.low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Bar {
            open_time: t,
            open,
            high,
            low,
            close,
            volume: dec!(1000),
            close_time: t + Duration::hours(1),
        }
    }

    #[test]
    fn inside_and_outside_bars() {
        let prev = bar(dec!(100), dec!(110), dec!(90), dec!(105));
        let inside = bar(dec!(102), dec!(108), dec!(95), dec!(104));
        let outside = bar(dec!(100), dec!(112), dec!(88), dec!(95));

        assert!(detect(CandlePattern::InsideBar, &prev, &inside));
        assert!(!detect(CandlePattern::OutsideBar, &prev, &inside));
        assert!(detect(CandlePattern::OutsideBar, &prev, &outside));
    }

    #[test]
    fn engulfing_requires_opposite_bodies() {
        // prev bearish, curr bullish and wrapping the body.
        let prev = bar(dec!(105), dec!(106), dec!(99), dec!(100));
        let curr = bar(dec!(99.5), dec!(107), dec!(99), dec!(106));
        assert!(detect(CandlePattern::BullishEngulfing, &prev, &curr));
        assert!(!detect(CandlePattern::BearishEngulfing, &prev, &curr));

        // Mirror image.
        let prev = bar(dec!(100), dec!(106), dec!(99), dec!(105));
        let curr = bar(dec!(105.5), dec!(106), dec!(98), dec!(99.5));
        assert!(detect(CandlePattern::BearishEngulfing, &prev, &curr));
    }

    #[test]
    fn doji_needs_a_small_body_and_a_real_range() {
        let prev = bar(dec!(100), dec!(101), dec!(99), dec!(100));
        let doji = bar(dec!(100), dec!(105), dec!(95), dec!(100.5));
        assert!(detect(CandlePattern::Doji, &prev, &doji));

        // Zero-range bar can never be a doji.
        let flat = bar(dec!(100), dec!(100), dec!(100), dec!(100));
        assert!(!detect(CandlePattern::Doji, &prev, &flat));

        let fat_body = bar(dec!(95), dec!(105), dec!(95), dec!(105));
        assert!(!detect(CandlePattern::Doji, &prev, &fat_body));
    }

    #[test]
    fn hammer_shape() {
        let prev = bar(dec!(100), dec!(101), dec!(99), dec!(100));
        // Long lower wick, tiny upper wick.
        let hammer = bar(dec!(100), dec!(101), dec!(96), dec!(100.8));
        assert!(detect(CandlePattern::Hammer, &prev, &hammer));

        // Upper wick too large.
        let not_hammer = bar(dec!(100), dec!(103), dec!(96), dec!(100.8));
        assert!(!detect(CandlePattern::Hammer, &prev, &not_hammer));
    }

    #[test]
    fn gaps_and_swings() {
        let prev = bar(dec!(100), dec!(110), dec!(90), dec!(105));
        let gap_up = bar(dec!(111), dec!(115), dec!(110.5), dec!(114));
        let gap_down = bar(dec!(89), dec!(89.5), dec!(85), dec!(86));

        assert!(detect(CandlePattern::GapUp, &prev, &gap_up));
        assert!(detect(CandlePattern::GapDown, &prev, &gap_down));
        assert!(detect(CandlePattern::HigherHigh, &prev, &gap_up));
        assert!(detect(CandlePattern::HigherLow, &prev, &gap_up));
        assert!(detect(CandlePattern::LowerHigh, &prev, &gap_down));
        assert!(detect(CandlePattern::LowerLow, &prev, &gap_down));
    }
}
