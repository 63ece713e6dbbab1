//! Signal quality quantization (`+CESQ`)
//!
//! The unit reports RSRQ, RSRP and SINR as raw table indices. Each index
//! stands for a dB interval; the first and last index of every table are
//! open-ended and saturate to infinity.

use serde::{Deserialize, Serialize};

/// One quantized measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalMetric {
    /// Raw table index as reported
    pub raw: u8,
    /// `[low, high]` bound of the interval the index stands for
    pub db_range: [f64; 2],
    /// Midpoint of `db_range` (infinite at saturated edges)
    pub db_average: f64,
}

impl SignalMetric {
    fn from_range(raw: u8, high: f64, step: f64, floor: f64, ceiling: f64) -> Self {
        let mut range = [high - step, high];
        if range[0] < floor {
            range[0] = f64::NEG_INFINITY;
        }
        if range[1] > ceiling {
            range[1] = f64::INFINITY;
        }
        Self {
            raw,
            db_range: range,
            db_average: (range[0] + range[1]) / 2.0,
        }
    }

    /// RSRQ: 0.5 dB steps, `-19.5 + 0.5 * raw` upper bound
    pub fn rsrq(raw: u8) -> Self {
        Self::from_range(raw, -19.5 + 0.5 * f64::from(raw), 0.5, -19.5, -3.0)
    }

    /// RSRP: 1 dBm steps, `-140 + raw` upper bound
    pub fn rsrp(raw: u8) -> Self {
        Self::from_range(raw, -140.0 + f64::from(raw), 1.0, -140.0, -44.0)
    }

    /// SINR: 1 dB steps, `-19 + rsrq_raw` upper bound
    ///
    /// The unit's report layout puts the usable value in the RSRQ slot, so
    /// the interval is computed from the RSRQ index while `raw` keeps the
    /// SINR slot as reported.
    pub fn sinr(raw: u8, rsrq_raw: u8) -> Self {
        Self::from_range(raw, -19.0 + f64::from(rsrq_raw), 1.0, -19.0, 30.0)
    }
}

/// Signal quality triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalQuality {
    pub rsrq: SignalMetric,
    pub rsrp: SignalMetric,
    pub sinr: SignalMetric,
}

impl SignalQuality {
    /// Build from the three raw `+CESQ` readings
    pub fn from_raw(rsrq: u8, rsrp: u8, sinr: u8) -> Self {
        Self {
            rsrq: SignalMetric::rsrq(rsrq),
            rsrp: SignalMetric::rsrp(rsrp),
            sinr: SignalMetric::sinr(sinr, rsrq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsrq_edges_saturate() {
        let low = SignalMetric::rsrq(0);
        assert_eq!(low.db_range[0], f64::NEG_INFINITY);
        assert_eq!(low.db_range[1], -19.5);
        assert_eq!(low.db_average, f64::NEG_INFINITY);

        let high = SignalMetric::rsrq(39);
        assert_eq!(high.db_range[1], f64::INFINITY);

        let mid = SignalMetric::rsrq(10);
        assert_eq!(mid.db_range, [-15.0, -14.5]);
        assert_eq!(mid.db_average, -14.75);
    }

    #[test]
    fn test_rsrp_edges_saturate() {
        assert_eq!(SignalMetric::rsrp(0).db_range, [f64::NEG_INFINITY, -140.0]);
        assert_eq!(SignalMetric::rsrp(97).db_range[1], f64::INFINITY);
        assert_eq!(SignalMetric::rsrp(50).db_range, [-91.0, -90.0]);
    }

    #[test]
    fn test_sinr_uses_rsrq_index() {
        let q = SignalQuality::from_raw(20, 60, 255);
        assert_eq!(q.sinr.raw, 255);
        assert_eq!(q.sinr.db_range, [0.0, 1.0]);

        assert_eq!(SignalMetric::sinr(7, 0).db_range[0], f64::NEG_INFINITY);
        assert_eq!(SignalMetric::sinr(7, 50).db_range[1], f64::INFINITY);
    }
}
