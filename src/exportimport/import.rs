//! Stage M (import): a two-phase import — validate every bucket file and
//! check for integrity conflicts before anything is written, then commit.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{de::DeserializeOwned, Serialize};

use crate::cancel::CancelToken;
use crate::error::{LocomotionError, Result};
use crate::exportimport::export::{ExportMetadata, SCHEMA_VERSION};
use crate::ids::ItemId;
use crate::model::item::TimelineItemBase;
use crate::model::place::Place;
use crate::model::sample::LocomotionSample;
use crate::storage::Store;

#[derive(Debug, serde::Deserialize, Serialize)]
struct Bucket {
    items: Vec<TimelineItemBase>,
    samples: Vec<LocomotionSample>,
}

pub struct ValidatedImport {
    metadata: ExportMetadata,
    buckets: Vec<Bucket>,
    places: Vec<Place>,
}

/// Phase 1: reads every bucket file and checks the import is internally
/// consistent before anything touches the store — a duplicate edge
/// (two items both claiming to be the same neighbor's `previous_item_id`
/// with different values) fails here as an [`LocomotionError::ImportIntegrityError`].
pub fn validate(dir: &Path) -> Result<ValidatedImport> {
    let metadata_json = std::fs::read_to_string(dir.join("metadata.json"))?;
    let metadata: ExportMetadata = serde_json::from_str(&metadata_json)?;

    if metadata.schema_version != SCHEMA_VERSION {
        return Err(LocomotionError::ImportSchemaMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: metadata.schema_version.clone(),
        });
    }

    let mut buckets = Vec::new();
    let mut places = Vec::new();

    for filename in &metadata.bucket_files {
        let path = dir.join(filename);
        if filename == "places.json.gz" {
            places = read_gzip_json(&path)?;
        } else {
            buckets.push(read_gzip_json::<Bucket>(&path)?);
        }
    }

    check_edge_consistency(&buckets)?;

    Ok(ValidatedImport { metadata, buckets, places })
}

fn check_edge_consistency(buckets: &[Bucket]) -> Result<()> {
    let mut claimed_next: std::collections::HashMap<ItemId, ItemId> = std::collections::HashMap::new();
    let mut seen_ids: HashSet<ItemId> = HashSet::new();

    for bucket in buckets {
        for item in &bucket.items {
            if !seen_ids.insert(item.id) {
                return Err(LocomotionError::ImportIntegrityError(format!("duplicate item id {}", item.id)));
            }
            if let Some(prev) = item.previous_item_id {
                if let Some(existing) = claimed_next.insert(prev, item.id) {
                    if existing != item.id {
                        return Err(LocomotionError::ImportIntegrityError(format!(
                            "item {prev} claimed as previous by both {existing} and {}",
                            item.id
                        )));
                    }
                }
            }
            if item.previous_item_id == Some(item.id) || item.next_item_id == Some(item.id) {
                return Err(LocomotionError::ImportIntegrityError(format!("item {} links to itself", item.id)));
            }
        }
    }
    Ok(())
}

/// Phase 2: commits a validated import into the store, chunk by chunk, with
/// a cancellation checkpoint between chunks.
pub fn commit(store: &Store, validated: ValidatedImport, cancel: &CancelToken) -> Result<()> {
    for bucket in validated.buckets {
        if cancel.is_cancelled() {
            return Err(LocomotionError::ExportCancelled);
        }
        for sample in &bucket.samples {
            store.put_sample(sample)?;
        }
        for item in &bucket.items {
            store.put_item(item)?;
        }
    }
    for place in &validated.places {
        store.put_place(place)?;
    }
    Ok(())
}

fn read_gzip_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exportimport::export::export_bucketed;
    use crate::model::item::{TimelineItemTrip, TimelineItemVisit};
    use chrono::{TimeZone, Utc};

    #[test]
    fn round_trips_through_export_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let item = TimelineItemBase::new_visit(
            base,
            base + chrono::Duration::minutes(5),
            TimelineItemVisit {
                place_id: None,
                confirmed_place: false,
                uncertain_place: true,
                custom_title: None,
                street_address: None,
                center_latitude: 0.0,
                center_longitude: 0.0,
                radius_mean: 10.0,
                radius_sd: 0.0,
            },
        );
        let config = crate::config::Config::default();
        export_bucketed(dir.path(), &[item], &[], &[], &config, None, &CancelToken::new()).unwrap();

        let validated = validate(dir.path()).unwrap();
        let store = Store::open_in_memory().unwrap();
        commit(&store, validated, &CancelToken::new()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.item_count, 1);
    }

    #[test]
    fn rejects_mismatched_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metadata.json"), r#"{"schema_version":"1.0.0","exported_at":"2024-01-01T00:00:00Z","since":null,"item_count":0,"sample_count":0,"place_count":0,"bucket_files":[]}"#).unwrap();
        let err = validate(dir.path()).unwrap_err();
        assert!(matches!(err, LocomotionError::ImportSchemaMismatch { .. }));
    }

    #[test]
    fn rejects_conflicting_edges() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let shared_prev = ItemId::new();
        let mut a = TimelineItemBase::new_trip(
            base,
            base,
            TimelineItemTrip {
                classified_activity_type: crate::model::activity::ActivityType::Walking,
                confirmed_type: None,
                uncertain_activity_type: false,
                distance_meters: 0.0,
                speed_mean: 0.0,
            },
        );
        a.previous_item_id = Some(shared_prev);
        let mut b = TimelineItemBase::new_trip(
            base,
            base,
            TimelineItemTrip {
                classified_activity_type: crate::model::activity::ActivityType::Walking,
                confirmed_type: None,
                uncertain_activity_type: false,
                distance_meters: 0.0,
                speed_mean: 0.0,
            },
        );
        b.previous_item_id = Some(shared_prev);

        let buckets = vec![Bucket { items: vec![a, b], samples: vec![] }];
        let err = check_edge_consistency(&buckets).unwrap_err();
        assert!(matches!(err, LocomotionError::ImportIntegrityError(_)));
    }
}
