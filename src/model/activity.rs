//! Activity type codes.
//!
//! These integer codes are part of the persisted format and MUST NOT be
//! reassigned — a stored sample's `classifier_results` keys into this enum by
//! its `i16` value, not by declaration order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ActivityType {
    Unknown = -1,
    Bogus = 0,
    Stationary = 1,
    Walking = 2,
    Running = 3,
    Cycling = 4,
    Car = 5,
    Airplane = 6,

    Train = 20,
    Bus = 21,
    MotorCycle = 22,
    Boat = 23,
    Tram = 24,
    Tractor = 25,
    Van = 26,
    Truck = 27,
    Scooter = 28,
    Taxi = 29,
    CableCar = 30,
    Funicular = 31,
    ChairLift = 32,
    SkiLift = 33,
    Helicopter = 34,
    Ferry = 35,

    Skateboarding = 50,
    InlineSkating = 51,
    Rowing = 52,
    Swimming = 53,
    Horseback = 54,
    Golf = 55,
    Hiking = 56,
    Wheelchair = 57,
    Kayaking = 58,
    SurfingSport = 59,
    Snowboarding = 60,
    Skiing = 61,
}

impl ActivityType {
    pub const COUNT: usize = 36;

    pub const ALL: [ActivityType; Self::COUNT] = [
        ActivityType::Unknown,
        ActivityType::Bogus,
        ActivityType::Stationary,
        ActivityType::Walking,
        ActivityType::Running,
        ActivityType::Cycling,
        ActivityType::Car,
        ActivityType::Airplane,
        ActivityType::Train,
        ActivityType::Bus,
        ActivityType::MotorCycle,
        ActivityType::Boat,
        ActivityType::Tram,
        ActivityType::Tractor,
        ActivityType::Van,
        ActivityType::Truck,
        ActivityType::Scooter,
        ActivityType::Taxi,
        ActivityType::CableCar,
        ActivityType::Funicular,
        ActivityType::ChairLift,
        ActivityType::SkiLift,
        ActivityType::Helicopter,
        ActivityType::Ferry,
        ActivityType::Skateboarding,
        ActivityType::InlineSkating,
        ActivityType::Rowing,
        ActivityType::Swimming,
        ActivityType::Horseback,
        ActivityType::Golf,
        ActivityType::Hiking,
        ActivityType::Wheelchair,
        ActivityType::Kayaking,
        ActivityType::SurfingSport,
        ActivityType::Snowboarding,
        ActivityType::Skiing,
    ];

    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.code() == code)
    }

    pub fn is_transport(self) -> bool {
        matches!(self.code(), 20..=35) || matches!(self, ActivityType::Car | ActivityType::Airplane)
    }

    pub fn is_stationary(self) -> bool {
        matches!(self, ActivityType::Stationary)
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|a| *a == self).expect("activity type in ALL")
    }
}

/// A full probability distribution over [`ActivityType::ALL`], indexed by
/// [`ActivityType::index`].
pub type ProbabilityVector = [f32; ActivityType::COUNT];

pub fn argmax(probs: &ProbabilityVector) -> ActivityType {
    let mut best_idx = 0usize;
    let mut best_val = f32::MIN;
    for (idx, &v) in probs.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    ActivityType::ALL[best_idx]
}

/// The winning activity type for a probability vector: [`argmax`], unless
/// its score is not positive, in which case the vector carries no signal and
/// the match is `Unknown`.
pub fn best_match(probs: &ProbabilityVector) -> ActivityType {
    let winner = argmax(probs);
    if probs[winner.index()] > 0.0 {
        winner
    } else {
        ActivityType::Unknown
    }
}

/// Averages a sequence of per-sample probability vectors component-wise.
/// Returns `None` for an empty sequence.
pub fn average_probabilities(vectors: &[ProbabilityVector]) -> Option<ProbabilityVector> {
    if vectors.is_empty() {
        return None;
    }
    let mut sum = [0.0f32; ActivityType::COUNT];
    for v in vectors {
        for (s, p) in sum.iter_mut().zip(v.iter()) {
            *s += p;
        }
    }
    let n = vectors.len() as f32;
    for s in sum.iter_mut() {
        *s /= n;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ActivityType::Unknown.code(), -1);
        assert_eq!(ActivityType::Bogus.code(), 0);
        assert_eq!(ActivityType::Stationary.code(), 1);
        assert_eq!(ActivityType::Walking.code(), 2);
        assert_eq!(ActivityType::Running.code(), 3);
        assert_eq!(ActivityType::Cycling.code(), 4);
        assert_eq!(ActivityType::Car.code(), 5);
        assert_eq!(ActivityType::Airplane.code(), 6);
    }

    #[test]
    fn argmax_picks_highest_probability() {
        let mut v: ProbabilityVector = [0.0; ActivityType::COUNT];
        v[ActivityType::Walking.index()] = 0.9;
        assert_eq!(argmax(&v), ActivityType::Walking);
    }

    #[test]
    fn from_code_roundtrips() {
        for a in ActivityType::ALL {
            assert_eq!(ActivityType::from_code(a.code()), Some(a));
        }
    }

    #[test]
    fn best_match_falls_back_to_unknown_on_a_nonpositive_score() {
        let v: ProbabilityVector = [0.0; ActivityType::COUNT];
        assert_eq!(best_match(&v), ActivityType::Unknown);
    }

    #[test]
    fn best_match_matches_argmax_when_positive() {
        let mut v: ProbabilityVector = [0.0; ActivityType::COUNT];
        v[ActivityType::Running.index()] = 0.6;
        assert_eq!(best_match(&v), ActivityType::Running);
    }

    #[test]
    fn average_probabilities_blends_component_wise() {
        let mut a: ProbabilityVector = [0.0; ActivityType::COUNT];
        a[ActivityType::Walking.index()] = 1.0;
        let mut b: ProbabilityVector = [0.0; ActivityType::COUNT];
        b[ActivityType::Walking.index()] = 0.0;
        let avg = average_probabilities(&[a, b]).unwrap();
        assert!((avg[ActivityType::Walking.index()] - 0.5).abs() < 1e-6);
    }
}
