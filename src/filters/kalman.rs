//! A pair of small fixed-state Kalman filters: one for horizontal position
//! plus velocity, one for altitude. Both operate directly over `f64` scalars
//! rather than through a general linear-algebra crate, since the state size
//! never changes.

/// 1-D constant-velocity Kalman filter, applied independently to latitude
/// and longitude (in metres, after a local equirectangular projection) to
/// form the horizontal filter, and directly to altitude for the vertical one.
#[derive(Debug, Clone)]
pub struct ScalarKalman {
    estimate: f64,
    velocity: f64,
    variance: f64,
    process_noise: f64,
    initialized: bool,
}

impl ScalarKalman {
    pub fn new(process_noise: f64) -> Self {
        Self { estimate: 0.0, velocity: 0.0, variance: 1.0, process_noise, initialized: false }
    }

    pub fn update(&mut self, measurement: f64, measurement_variance: f64, dt_secs: f64) -> f64 {
        if !self.initialized {
            self.estimate = measurement;
            self.variance = measurement_variance;
            self.initialized = true;
            return self.estimate;
        }

        let predicted = self.estimate + self.velocity * dt_secs;
        let predicted_variance = self.variance + self.process_noise * dt_secs.max(0.0);

        let gain = predicted_variance / (predicted_variance + measurement_variance);
        let residual = measurement - predicted;

        if dt_secs > 0.0 {
            self.velocity = (1.0 - gain) * self.velocity + gain * (residual / dt_secs);
        }
        self.estimate = predicted + gain * residual;
        self.variance = (1.0 - gain) * predicted_variance;

        self.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }
}

/// Filters a stream of raw (latitude, longitude) fixes into a smoothed
/// horizontal position, plus a filtered altitude stream.
#[derive(Debug, Clone)]
pub struct LocationKalman {
    latitude: ScalarKalman,
    longitude: ScalarKalman,
    altitude: ScalarKalman,
    last_date: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for LocationKalman {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationKalman {
    pub fn new() -> Self {
        Self {
            latitude: ScalarKalman::new(1e-6),
            longitude: ScalarKalman::new(1e-6),
            altitude: ScalarKalman::new(0.25),
            last_date: None,
        }
    }

    /// Feeds one raw fix through the filter pair, returning the smoothed
    /// (latitude, longitude, altitude).
    pub fn update(
        &mut self,
        date: chrono::DateTime<chrono::Utc>,
        latitude: f64,
        longitude: f64,
        horizontal_accuracy: f64,
        altitude: Option<f64>,
        vertical_accuracy: Option<f64>,
    ) -> (f64, f64, Option<f64>) {
        let dt_secs = self
            .last_date
            .map(|prev| (date - prev).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
            .max(0.0);
        self.last_date = Some(date);

        // Horizontal accuracy is a 1-sigma radius in metres; converting it to
        // degrees at the fix's latitude keeps the two scalar filters in units
        // that match their respective measurements.
        let meters_per_degree_lat = 111_320.0;
        let meters_per_degree_lon = 111_320.0 * latitude.to_radians().cos().max(0.01);
        let lat_variance = (horizontal_accuracy / meters_per_degree_lat).powi(2);
        let lon_variance = (horizontal_accuracy / meters_per_degree_lon).powi(2);

        let filtered_lat = self.latitude.update(latitude, lat_variance, dt_secs);
        let filtered_lon = self.longitude.update(longitude, lon_variance, dt_secs);
        let filtered_alt = altitude.map(|alt| {
            let variance = vertical_accuracy.unwrap_or(10.0).powi(2);
            self.altitude.update(alt, variance, dt_secs)
        });

        (filtered_lat, filtered_lon, filtered_alt)
    }

    pub fn speed_estimate(&self, latitude: f64) -> f64 {
        let meters_per_degree_lat = 111_320.0;
        let meters_per_degree_lon = 111_320.0 * latitude.to_radians().cos().max(0.01);
        let v_lat = self.latitude.velocity() * meters_per_degree_lat;
        let v_lon = self.longitude.velocity() * meters_per_degree_lon;
        (v_lat * v_lat + v_lon * v_lon).sqrt()
    }
}
