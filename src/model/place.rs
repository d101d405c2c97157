//! Places: durable, reusable locations a user visits repeatedly, carrying
//! arrival/leaving/duration/occupancy histograms bucketed by weekday class.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::PlaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeekdayClass {
    Weekday,
    Weekend,
}

impl WeekdayClass {
    pub fn of(date: DateTime<Utc>) -> Self {
        use chrono::Datelike;
        match date.weekday() {
            chrono::Weekday::Sat | chrono::Weekday::Sun => WeekdayClass::Weekend,
            _ => WeekdayClass::Weekday,
        }
    }
}

/// A histogram of 48 half-hour-of-day buckets, one per [`WeekdayClass`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOfDayHistogram {
    pub weekday: [f64; 48],
    pub weekend: [f64; 48],
}

impl Default for TimeOfDayHistogram {
    fn default() -> Self {
        Self { weekday: [0.0; 48], weekend: [0.0; 48] }
    }
}

impl TimeOfDayHistogram {
    pub fn bucket_of(date: DateTime<Utc>) -> usize {
        use chrono::Timelike;
        let minutes = date.hour() as usize * 60 + date.minute() as usize;
        (minutes / 30).min(47)
    }

    pub fn add(&mut self, date: DateTime<Utc>, weight: f64) {
        let bucket = Self::bucket_of(date);
        match WeekdayClass::of(date) {
            WeekdayClass::Weekday => self.weekday[bucket] += weight,
            WeekdayClass::Weekend => self.weekend[bucket] += weight,
        }
    }

    fn row(&self, class: WeekdayClass) -> &[f64; 48] {
        match class {
            WeekdayClass::Weekday => &self.weekday,
            WeekdayClass::Weekend => &self.weekend,
        }
    }

    pub fn probability(&self, class: WeekdayClass, bucket: usize) -> f64 {
        let row = self.row(class);
        let total: f64 = row.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        row[bucket.min(47)] / total
    }
}

/// A histogram over visit duration, bucketed in minutes on a log scale
/// (0-15, 15-30, 30-60, 60-120, 120-240, 240-480, 480+).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationHistogram {
    pub buckets: [f64; 7],
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self { buckets: [0.0; 7] }
    }
}

const DURATION_BOUNDS_MINUTES: [f64; 6] = [15.0, 30.0, 60.0, 120.0, 240.0, 480.0];

impl DurationHistogram {
    pub fn bucket_of(minutes: f64) -> usize {
        DURATION_BOUNDS_MINUTES
            .iter()
            .position(|&bound| minutes < bound)
            .unwrap_or(DURATION_BOUNDS_MINUTES.len())
    }

    pub fn add(&mut self, minutes: f64, weight: f64) {
        self.buckets[Self::bucket_of(minutes)] += weight;
    }

    pub fn mean_minutes(&self) -> f64 {
        let total: f64 = self.buckets.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let midpoints = [7.5, 22.5, 45.0, 90.0, 180.0, 360.0, 600.0];
        self.buckets
            .iter()
            .zip(midpoints.iter())
            .map(|(w, m)| w * m)
            .sum::<f64>()
            / total
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub name: Option<String>,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_mean: f64,
    pub radius_sd: f64,

    pub arrival_times: TimeOfDayHistogram,
    pub leaving_times: TimeOfDayHistogram,
    pub visit_durations: DurationHistogram,
    pub occupancy: TimeOfDayHistogram,

    pub visit_count: u64,
    pub last_saved: DateTime<Utc>,
}

impl Place {
    pub fn new(center_latitude: f64, center_longitude: f64, radius_mean: f64) -> Self {
        let now = Utc::now();
        Self {
            id: PlaceId::new(),
            name: None,
            center_latitude,
            center_longitude,
            radius_mean,
            radius_sd: 0.0,
            arrival_times: TimeOfDayHistogram::default(),
            leaving_times: TimeOfDayHistogram::default(),
            visit_durations: DurationHistogram::default(),
            occupancy: TimeOfDayHistogram::default(),
            visit_count: 0,
            last_saved: now,
        }
    }

    pub fn center(&self) -> geo::Point<f64> {
        geo::Point::new(self.center_longitude, self.center_latitude)
    }

    pub fn record_visit(&mut self, arrival: DateTime<Utc>, leaving: DateTime<Utc>) {
        self.arrival_times.add(arrival, 1.0);
        self.leaving_times.add(leaving, 1.0);
        let minutes = (leaving - arrival).num_seconds() as f64 / 60.0;
        self.visit_durations.add(minutes.max(0.0), 1.0);
        self.visit_count += 1;
    }
}
