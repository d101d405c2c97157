//! Stage K: the place engine and its histogram maintenance helpers.

pub mod engine;
pub mod histogram;

pub use engine::{PlaceCandidate, PlaceEngine};
