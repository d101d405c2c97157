//! Histogram maintenance helpers shared by the place engine: exponential
//! decay keeps old visits from permanently dominating a place's profile.

use crate::model::place::{DurationHistogram, TimeOfDayHistogram};

/// Multiplies every bucket by `factor`, used to decay older observations
/// before folding in a new visit so a place's profile tracks recent behavior.
pub fn decay_time_of_day(hist: &mut TimeOfDayHistogram, factor: f64) {
    for bucket in hist.weekday.iter_mut().chain(hist.weekend.iter_mut()) {
        *bucket *= factor;
    }
}

pub fn decay_duration(hist: &mut DurationHistogram, factor: f64) {
    for bucket in hist.buckets.iter_mut() {
        *bucket *= factor;
    }
}
