//! Typed identifiers for the entity model.
//!
//! Every entity is keyed by a `Uuid` wrapped in a zero-sized phantom marker so
//! a `SampleId` can never be passed where an `ItemId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LocomotionError, Result};

pub struct Id<T> {
    inner: Uuid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub fn new() -> Self {
        Self { inner: Uuid::new_v4(), _marker: PhantomData }
    }

    pub fn from_uuid(inner: Uuid) -> Self {
        Self { inner, _marker: PhantomData }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.inner
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}
impl<T> Eq for Id<T> {}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl<T> FromStr for Id<T> {
    type Err = LocomotionError;
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Id::from_uuid)
            .map_err(|e| LocomotionError::InvalidInput(format!("bad id {s:?}: {e}")))
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.inner.to_string())
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uuid::parse_str(&s).map(Id::from_uuid).map_err(serde::de::Error::custom)
    }
}

pub type SampleId = Id<crate::model::sample::LocomotionSample>;
pub type ItemId = Id<crate::model::item::TimelineItemBase>;
pub type PlaceId = Id<crate::model::place::Place>;
