//! Stage M (export): writes the timeline out as gzip-compressed, bucketed
//! JSON files plus a `metadata.json` manifest. An incremental export only
//! includes rows whose `last_saved` is after a watermark.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{LocomotionError, Result};
use crate::model::item::TimelineItemBase;
use crate::model::place::Place;
use crate::model::sample::LocomotionSample;

pub const SCHEMA_VERSION: &str = "2.0.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub schema_version: String,
    pub exported_at: DateTime<Utc>,
    pub since: Option<DateTime<Utc>>,
    pub item_count: usize,
    pub sample_count: usize,
    pub place_count: usize,
    pub bucket_files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Bucket {
    items: Vec<TimelineItemBase>,
    samples: Vec<LocomotionSample>,
}

/// Exports `items`/`samples`/`places` into `dir`, chunking items (with their
/// owned samples) into gzip JSON bucket files of `config.export_chunk_size`,
/// and a separate `places.json.gz` file. `since`, when set, makes this an
/// incremental export: only items/samples/places saved after it are
/// included.
pub fn export_bucketed(
    dir: &Path,
    items: &[TimelineItemBase],
    samples: &[LocomotionSample],
    places: &[Place],
    config: &Config,
    since: Option<DateTime<Utc>>,
    cancel: &CancelToken,
) -> Result<ExportMetadata> {
    std::fs::create_dir_all(dir)?;

    let filtered_items: Vec<&TimelineItemBase> =
        items.iter().filter(|i| since.is_none_or(|s| i.last_saved > s)).collect();
    let filtered_places: Vec<&Place> = places.iter().filter(|p| since.is_none_or(|s| p.last_saved > s)).collect();

    let mut bucket_files = Vec::new();
    let mut sample_count = 0usize;

    for (chunk_index, chunk) in filtered_items.chunks(config.export_chunk_size).enumerate() {
        if cancel.is_cancelled() {
            return Err(LocomotionError::ExportCancelled);
        }

        let chunk_sample_ids: std::collections::HashSet<_> = chunk.iter().flat_map(|i| i.sample_ids.iter().copied()).collect();
        let chunk_samples: Vec<LocomotionSample> = samples
            .iter()
            .filter(|s| chunk_sample_ids.contains(&s.id) && since.is_none_or(|since| s.last_saved > since))
            .cloned()
            .collect();
        sample_count += chunk_samples.len();

        let bucket = Bucket { items: chunk.iter().map(|i| (*i).clone()).collect(), samples: chunk_samples };
        let filename = format!("items_{chunk_index:05}.json.gz");
        write_gzip_json(&dir.join(&filename), &bucket)?;
        bucket_files.push(filename);
    }

    if !filtered_places.is_empty() {
        write_gzip_json(&dir.join("places.json.gz"), &filtered_places)?;
        bucket_files.push("places.json.gz".to_string());
    }

    let metadata = ExportMetadata {
        schema_version: SCHEMA_VERSION.to_string(),
        exported_at: Utc::now(),
        since,
        item_count: filtered_items.len(),
        sample_count,
        place_count: filtered_places.len(),
        bucket_files,
    };

    let metadata_json = serde_json::to_string_pretty(&metadata)?;
    std::fs::write(dir.join("metadata.json"), metadata_json)?;

    Ok(metadata)
}

fn write_gzip_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    let json = serde_json::to_vec(value)?;
    encoder.write_all(&json)?;
    encoder.finish()?;
    Ok(())
}
