//! Position fix aggregation from the GNSS sentence stream
//!
//! A fix is assembled from `$GNRMC` (time, date, position) and, when an
//! accuracy is requested, `$GNGST` (error ellipse). The aggregator is a
//! [`LineMatcher`] so it runs inside the transaction registry and can hand
//! back a partial fix when the deadline passes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::error::{ModemError, Result};
use super::line::Line;
use super::protocol::nmea::{NmeaSentence, RmcData};
use super::transaction::{LineMatcher, Step};

/// Default time allowed for a fix
pub const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on any fix timeout
pub const MAX_LOCATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Clamp a requested timeout to [`MAX_LOCATION_TIMEOUT`]
pub fn cap_timeout(timeout: Duration) -> Duration {
    timeout.min(MAX_LOCATION_TIMEOUT)
}

/// Position report
///
/// Latitude is positive north, longitude positive east, both in decimal
/// degrees. `accuracy` is the worst error ellipse axis in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// False when the deadline passed before the requested accuracy
    pub success: bool,
    pub datetime: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

/// Progress of one fix request
#[derive(Debug, Clone, PartialEq)]
pub enum FixState {
    /// No valid RMC sentence seen yet
    AwaitingFirstFix,
    /// Position known, waiting for a GST report within the bound
    AwaitingAccuracy(PositionFix),
    /// Result delivered
    Done,
}

/// Aggregates RMC and GST sentences into one [`PositionFix`]
#[derive(Debug)]
pub struct LocationFixAggregator {
    min_accuracy: f64,
    state: FixState,
}

impl LocationFixAggregator {
    /// `min_accuracy <= 0` accepts the first valid position
    pub fn new(min_accuracy: f64) -> Self {
        Self {
            min_accuracy,
            state: FixState::AwaitingFirstFix,
        }
    }

    pub fn state(&self) -> &FixState {
        &self.state
    }

    fn on_rmc(&mut self, rmc: &RmcData) -> Step<PositionFix> {
        if !rmc.is_valid() {
            return Step::Pending;
        }
        let (Some(datetime), Some(latitude), Some(longitude)) =
            (rmc.datetime(), rmc.latitude, rmc.longitude)
        else {
            self.state = FixState::Done;
            return Step::Done(Err(ModemError::protocol(
                "RMC sentence reports a fix but lacks time, date or position",
            )));
        };

        let accuracy = match &self.state {
            FixState::AwaitingAccuracy(fix) => fix.accuracy,
            _ => None,
        };
        let fix = PositionFix {
            success: false,
            datetime,
            latitude: latitude.to_decimal(),
            longitude: longitude.to_decimal(),
            accuracy,
        };
        trace!("Position update: {:.6}, {:.6}", fix.latitude, fix.longitude);

        if self.min_accuracy <= 0.0 {
            return self.finish(fix);
        }
        self.state = FixState::AwaitingAccuracy(fix);
        Step::Pending
    }

    fn on_gst(&mut self, time_set: bool, accuracy: Option<f64>) -> Step<PositionFix> {
        if !time_set {
            return Step::Pending;
        }
        let FixState::AwaitingAccuracy(fix) = &mut self.state else {
            return Step::Pending;
        };
        let Some(accuracy) = accuracy else {
            return Step::Pending;
        };
        fix.accuracy = Some(accuracy);
        debug!("Position accuracy {} m (want {} m)", accuracy, self.min_accuracy);

        if accuracy <= self.min_accuracy {
            let fix = fix.clone();
            return self.finish(fix);
        }
        Step::Pending
    }

    fn finish(&mut self, mut fix: PositionFix) -> Step<PositionFix> {
        fix.success = true;
        self.state = FixState::Done;
        Step::Done(Ok(fix))
    }
}

impl LineMatcher for LocationFixAggregator {
    type Output = PositionFix;

    fn offer(&mut self, line: &Line) -> Step<PositionFix> {
        let is_rmc = line.starts_with("$GNRMC");
        if !is_rmc && !line.starts_with("$GNGST") {
            return Step::Pending;
        }
        let sentence = match NmeaSentence::parse(line.text()) {
            Ok(sentence) => sentence,
            Err(e) => {
                debug!("Ignoring NMEA sentence: {}", e);
                return Step::Pending;
            }
        };
        match sentence {
            NmeaSentence::Rmc(rmc) => self.on_rmc(&rmc),
            NmeaSentence::Gst(gst) => self.on_gst(gst.has_time(), gst.accuracy()),
            NmeaSentence::Other { .. } => Step::Pending,
        }
    }

    fn expire(self) -> Result<PositionFix> {
        match self.state {
            FixState::AwaitingAccuracy(fix) => Ok(fix),
            _ => Err(ModemError::Timeout),
        }
    }
}
