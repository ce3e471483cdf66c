//! Pinbar detection on a single candle.
//!
//! A pinbar has a body no larger than 30% of the bar's range and a wick at
//! least twice the body on either side. A flat bar (`high == low`) satisfies
//! both conditions trivially and is reported as a pinbar.

use crate::bars::Bar;

/// Body may not exceed this share of the high-low range.
pub const MAX_BODY_RATIO: f64 = 0.3;
/// One wick must be at least this many bodies long.
pub const MIN_WICK_TO_BODY: f64 = 2.0;

pub fn is_pinbar(bar: &Bar) -> bool {
    is_pinbar_ohlc(bar.open, bar.high, bar.low, bar.close)
}

pub fn is_pinbar_ohlc(open: f64, high: f64, low: f64, close: f64) -> bool {
    let body = (close - open).abs();
    let upper_wick = high - open.max(close);
    let lower_wick = open.min(close) - low;

    body <= MAX_BODY_RATIO * (high - low)
        && (upper_wick >= MIN_WICK_TO_BODY * body || lower_wick >= MIN_WICK_TO_BODY * body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wide_body_is_not_a_pinbar() {
        // body 0.0045 over range 0.006
        assert!(!is_pinbar_ohlc(1.1000, 1.1050, 1.0990, 1.1045));
    }

    #[test]
    fn long_upper_wick_is_a_pinbar() {
        // body 0.0005, range 0.0110, upper wick 0.0095
        assert!(is_pinbar_ohlc(1.1000, 1.1100, 1.0990, 1.1005));
    }

    #[test]
    fn long_lower_wick_is_a_pinbar() {
        assert!(is_pinbar_ohlc(1.1005, 1.1010, 1.0900, 1.1000));
    }

    #[test]
    fn small_body_centred_wicks_is_not_a_pinbar() {
        // body 1.0 is <= 0.3 * 4.0 but both wicks are 1.5 < 2.0
        assert!(!is_pinbar_ohlc(10.0, 12.5, 8.5, 11.0));
    }

    #[test]
    fn flat_bar_is_a_pinbar() {
        assert!(is_pinbar_ohlc(1.25, 1.25, 1.25, 1.25));
    }

    fn bar_strategy() -> impl Strategy<Value = (f64, f64, f64, f64)> {
        // low, then non-negative offsets for the body bottom, body size and upper wick
        (1.0f64..1000.0, 0.0f64..50.0, 0.0f64..50.0, 0.0f64..50.0)
    }

    proptest! {
        #[test]
        fn zero_range_bars_are_always_pinbars(price in -1.0e6f64..1.0e6) {
            prop_assert!(is_pinbar_ohlc(price, price, price, price));
        }

        #[test]
        fn direction_of_body_does_not_matter((low, lower, body, upper) in bar_strategy()) {
            let bottom = low + lower;
            let top = bottom + body;
            let high = top + upper;

            prop_assert_eq!(
                is_pinbar_ohlc(bottom, high, low, top),
                is_pinbar_ohlc(top, high, low, bottom)
            );
        }
    }
}
