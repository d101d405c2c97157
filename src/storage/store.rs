//! The durable store: a `rusqlite` connection plus the CRUD and atomic-batch
//! operations the rest of the crate uses. Mirrors the shape of a classic
//! embedded key-value `StorageBackend` (open / put / get / batch / stats)
//! while being backed by real relational tables underneath.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{LocomotionError, Result};
use crate::ids::{ItemId, SampleId};
use crate::model::activity::ActivityType;
use crate::model::item::{TimelineItemBase, TimelineItemKind};
use crate::model::place::Place;
use crate::model::sample::LocomotionSample;
use crate::storage::schema::{CREATE_SCHEMA, SCHEMA_VERSION};

pub struct Store {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub sample_count: u64,
    pub item_count: u64,
    pub place_count: u64,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA defer_foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        let current: i64 = conn
            .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| row.get(0))
            .optional()
            .unwrap_or(None)
            .unwrap_or(0);

        if current >= SCHEMA_VERSION {
            return Ok(());
        }

        conn.execute_batch(CREATE_SCHEMA).map_err(|e| LocomotionError::MigrationFailed {
            version: SCHEMA_VERSION,
            reason: e.to_string(),
        })?;

        if current == 0 {
            conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        } else {
            conn.execute("UPDATE schema_meta SET version = ?1", params![SCHEMA_VERSION])?;
        }
        Ok(())
    }

    pub fn put_sample(&self, sample: &LocomotionSample) -> Result<()> {
        let conn = self.conn.lock();
        insert_sample(&conn, sample)
    }

    pub fn get_sample(&self, id: &SampleId) -> Result<Option<LocomotionSample>> {
        let conn = self.conn.lock();
        row_to_sample(&conn, id)
    }

    /// Fetches every sample in `ids` that still exists, silently skipping any
    /// that have since been hard-deleted (e.g. by pruning).
    pub fn get_samples(&self, ids: &[SampleId]) -> Result<Vec<LocomotionSample>> {
        let conn = self.conn.lock();
        let mut samples = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(sample) = row_to_sample(&conn, id)? {
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    pub fn put_item(&self, item: &TimelineItemBase) -> Result<()> {
        let conn = self.conn.lock();
        insert_item(&conn, item)?;
        sync_item_rtree(&conn, item)?;
        Ok(())
    }

    pub fn get_item(&self, id: &ItemId) -> Result<Option<TimelineItemBase>> {
        let conn = self.conn.lock();
        row_to_item(&conn, id)
    }

    pub fn put_place(&self, place: &Place) -> Result<()> {
        let conn = self.conn.lock();
        insert_place(&conn, place)?;
        sync_place_rtree(&conn, place)?;
        Ok(())
    }

    pub fn put_activity_model(&self, model: &crate::classifier::ActivityTypesModel) -> Result<()> {
        let conn = self.conn.lock();
        let payload = serde_json::to_string(model)?;
        conn.execute(
            "INSERT INTO activity_models (geo_key, depth, sample_count, payload) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(geo_key) DO UPDATE SET depth = excluded.depth, sample_count = excluded.sample_count, payload = excluded.payload",
            params![model.geo_key, model.depth, model.sample_count as i64, payload],
        )?;
        Ok(())
    }

    /// Commits every item in a processor pass's chain atomically: either all
    /// edge/sample reassignments land, or none do.
    pub fn commit_item_chain(&self, items: &[TimelineItemBase]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for item in items {
            insert_item(&tx, item)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Clears `timeline_item_id` on the given samples — used when an item is
    /// soft-deleted and its samples are detached rather than removed.
    pub fn detach_samples(&self, sample_ids: &[SampleId]) -> Result<()> {
        let conn = self.conn.lock();
        let tx_conn = &*conn;
        for id in sample_ids {
            tx_conn.execute("UPDATE samples SET timeline_item_id = NULL WHERE id = ?1", params![id.to_string()])?;
        }
        Ok(())
    }

    /// Hard-deletes the given samples outright — used by the pruning pass,
    /// which (unlike item soft-delete) permanently discards density-reduced
    /// samples rather than merely detaching them.
    pub fn delete_samples(&self, sample_ids: &[SampleId]) -> Result<()> {
        let conn = self.conn.lock();
        let tx_conn = &*conn;
        for id in sample_ids {
            tx_conn.execute("DELETE FROM samples WHERE id = ?1", params![id.to_string()])?;
        }
        Ok(())
    }

    /// Confirmed samples inside a lat/lon bounding box, most recent first,
    /// capped at `limit` — the training set a classifier cell's background
    /// training run draws from (spec §4.G step 1).
    pub fn confirmed_samples_in_bbox(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
        limit: usize,
    ) -> Result<Vec<LocomotionSample>> {
        let conn = self.conn.lock();
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM samples
                 WHERE confirmed_type IS NOT NULL
                   AND latitude BETWEEN ?1 AND ?2
                   AND longitude BETWEEN ?3 AND ?4
                 ORDER BY date DESC LIMIT ?5",
            )?;
            stmt.query_map(params![min_lat, max_lat, min_lon, max_lon, limit as i64], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut samples = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(sample_id) = id.parse() else { continue };
            if let Some(sample) = row_to_sample(&conn, &sample_id)? {
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let sample_count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |r| r.get(0))?;
        let item_count: i64 = conn.query_row("SELECT COUNT(*) FROM items WHERE deleted = 0", [], |r| r.get(0))?;
        let place_count: i64 = conn.query_row("SELECT COUNT(*) FROM places", [], |r| r.get(0))?;
        Ok(StoreStats {
            sample_count: sample_count as u64,
            item_count: item_count as u64,
            place_count: place_count as u64,
        })
    }

    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

fn insert_sample(conn: &Connection, sample: &LocomotionSample) -> Result<()> {
    let classifier_json = sample.classifier_results.map(|p| serde_json::to_string(&p)).transpose()?;
    conn.execute(
        "INSERT INTO samples (
            id, date, latitude, longitude, altitude, horizontal_accuracy, vertical_accuracy,
            course, course_accuracy, speed, speed_accuracy, step_hz, xy_acceleration, z_acceleration,
            heart_rate, moving_state, recording_state, classifier_results, confirmed_type, timeline_item_id, last_saved
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
        ON CONFLICT(id) DO UPDATE SET
            timeline_item_id = excluded.timeline_item_id,
            classifier_results = excluded.classifier_results,
            confirmed_type = excluded.confirmed_type,
            last_saved = excluded.last_saved",
        params![
            sample.id.to_string(),
            sample.date.to_rfc3339(),
            sample.latitude,
            sample.longitude,
            sample.altitude,
            sample.horizontal_accuracy,
            sample.vertical_accuracy,
            sample.course,
            sample.course_accuracy,
            sample.speed,
            sample.speed_accuracy,
            sample.step_hz,
            sample.x_y_acceleration,
            sample.z_acceleration,
            sample.heart_rate,
            format!("{:?}", sample.moving_state),
            format!("{:?}", sample.recording_state),
            classifier_json,
            sample.confirmed_type.map(ActivityType::code),
            sample.timeline_item_id.map(|id| id.to_string()),
            sample.last_saved.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_sample(conn: &Connection, id: &SampleId) -> Result<Option<LocomotionSample>> {
    let mut stmt = conn.prepare(
        "SELECT date, latitude, longitude, altitude, horizontal_accuracy, vertical_accuracy,
                course, course_accuracy, speed, speed_accuracy, step_hz, xy_acceleration, z_acceleration,
                heart_rate, moving_state, recording_state, classifier_results, confirmed_type, timeline_item_id, last_saved
         FROM samples WHERE id = ?1",
    )?;
    let result = stmt
        .query_row(params![id.to_string()], |row| {
            let date: String = row.get(0)?;
            let classifier_json: Option<String> = row.get(16)?;
            let confirmed_code: Option<i16> = row.get(17)?;
            let item_id: Option<String> = row.get(18)?;
            let last_saved: String = row.get(19)?;
            let moving_state: String = row.get(14)?;
            let recording_state: String = row.get(15)?;

            Ok(LocomotionSample {
                id: *id,
                date: DateTime::parse_from_rfc3339(&date).unwrap().with_timezone(&Utc),
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                altitude: row.get(3)?,
                horizontal_accuracy: row.get(4)?,
                vertical_accuracy: row.get(5)?,
                course: row.get(6)?,
                course_accuracy: row.get(7)?,
                speed: row.get(8)?,
                speed_accuracy: row.get(9)?,
                step_hz: row.get(10)?,
                x_y_acceleration: row.get(11)?,
                z_acceleration: row.get(12)?,
                heart_rate: row.get(13)?,
                moving_state: parse_moving_state(&moving_state),
                recording_state: parse_recording_state(&recording_state),
                classifier_results: classifier_json.and_then(|s| serde_json::from_str(&s).ok()),
                confirmed_type: confirmed_code.and_then(ActivityType::from_code),
                timeline_item_id: item_id.and_then(|s| s.parse().ok()),
                last_saved: DateTime::parse_from_rfc3339(&last_saved).unwrap().with_timezone(&Utc),
            })
        })
        .optional()?;
    Ok(result)
}

fn parse_moving_state(s: &str) -> crate::model::sample::MovingState {
    use crate::model::sample::MovingState::*;
    match s {
        "Stationary" => Stationary,
        "Moving" => Moving,
        _ => Uncertain,
    }
}

fn parse_recording_state(s: &str) -> crate::model::sample::RecordingState {
    use crate::model::sample::RecordingState::*;
    match s {
        "Sleeping" => Sleeping,
        "Off" => Off,
        _ => Recording,
    }
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct ItemRollup {
    step_count: f64,
    floors_ascended: u32,
    floors_descended: u32,
    altitude_mean: Option<f64>,
    energy_kcal: f64,
    heart_rate_mean: Option<f64>,
    heart_rate_max: Option<f64>,
}

fn insert_item(conn: &Connection, item: &TimelineItemBase) -> Result<()> {
    let (kind, payload) = match &item.kind {
        crate::model::item::TimelineItemKind::Visit(v) => ("visit", serde_json::to_string(v)?),
        crate::model::item::TimelineItemKind::Trip(t) => ("trip", serde_json::to_string(t)?),
    };
    let rollup = serde_json::to_string(&ItemRollup {
        step_count: item.step_count,
        floors_ascended: item.floors_ascended,
        floors_descended: item.floors_descended,
        altitude_mean: item.altitude_mean,
        energy_kcal: item.energy_kcal,
        heart_rate_mean: item.heart_rate_mean,
        heart_rate_max: item.heart_rate_max,
    })?;
    conn.execute(
        "INSERT INTO items (
            id, previous_item_id, next_item_id, start_date, end_date, disabled, deleted, locked,
            samples_changed, source, source_version, last_saved, kind, payload, rollup
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
        ON CONFLICT(id) DO UPDATE SET
            previous_item_id = excluded.previous_item_id,
            next_item_id = excluded.next_item_id,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            disabled = excluded.disabled,
            deleted = excluded.deleted,
            locked = excluded.locked,
            samples_changed = excluded.samples_changed,
            last_saved = excluded.last_saved,
            payload = excluded.payload,
            rollup = excluded.rollup",
        params![
            item.id.to_string(),
            item.previous_item_id.map(|id| id.to_string()),
            item.next_item_id.map(|id| id.to_string()),
            item.start_date.to_rfc3339(),
            item.end_date.to_rfc3339(),
            item.disabled as i64,
            item.deleted as i64,
            item.locked as i64,
            item.samples_changed as i64,
            item.source,
            item.source_version,
            item.last_saved.to_rfc3339(),
            kind,
            payload,
            rollup,
        ],
    )?;

    for sample_id in &item.sample_ids {
        conn.execute(
            "UPDATE samples SET timeline_item_id = ?1 WHERE id = ?2",
            params![item.id.to_string(), sample_id.to_string()],
        )?;
    }
    Ok(())
}

fn row_to_item(conn: &Connection, id: &ItemId) -> Result<Option<TimelineItemBase>> {
    let mut stmt = conn.prepare(
        "SELECT previous_item_id, next_item_id, start_date, end_date, disabled, deleted, locked,
                samples_changed, source, source_version, last_saved, kind, payload, rollup
         FROM items WHERE id = ?1",
    )?;
    let row = stmt
        .query_row(params![id.to_string()], |row| {
            let previous_item_id: Option<String> = row.get(0)?;
            let next_item_id: Option<String> = row.get(1)?;
            let start_date: String = row.get(2)?;
            let end_date: String = row.get(3)?;
            let disabled: i64 = row.get(4)?;
            let deleted: i64 = row.get(5)?;
            let locked: i64 = row.get(6)?;
            let samples_changed: i64 = row.get(7)?;
            let source: String = row.get(8)?;
            let source_version: String = row.get(9)?;
            let last_saved: String = row.get(10)?;
            let kind: String = row.get(11)?;
            let payload: String = row.get(12)?;
            let rollup: String = row.get(13)?;
            Ok((
                previous_item_id, next_item_id, start_date, end_date, disabled, deleted, locked,
                samples_changed, source, source_version, last_saved, kind, payload, rollup,
            ))
        })
        .optional()?;

    let Some((
        previous_item_id, next_item_id, start_date, end_date, disabled, deleted, locked,
        samples_changed, source, source_version, last_saved, kind, payload, rollup,
    )) = row
    else {
        return Ok(None);
    };

    let kind = match kind.as_str() {
        "visit" => TimelineItemKind::Visit(serde_json::from_str(&payload)?),
        "trip" => TimelineItemKind::Trip(serde_json::from_str(&payload)?),
        other => return Err(LocomotionError::StoreConstraintViolation(format!("unknown item kind {other}"))),
    };
    let rollup: ItemRollup = serde_json::from_str(&rollup).unwrap_or_default();

    let mut sample_stmt = conn.prepare("SELECT id FROM samples WHERE timeline_item_id = ?1 ORDER BY date ASC")?;
    let sample_ids: Vec<SampleId> = sample_stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .filter_map(|s| s.parse().ok())
        .collect();

    Ok(Some(TimelineItemBase {
        id: *id,
        previous_item_id: previous_item_id.and_then(|s| s.parse().ok()),
        next_item_id: next_item_id.and_then(|s| s.parse().ok()),
        start_date: DateTime::parse_from_rfc3339(&start_date).unwrap().with_timezone(&Utc),
        end_date: DateTime::parse_from_rfc3339(&end_date).unwrap().with_timezone(&Utc),
        sample_ids,
        disabled: disabled != 0,
        deleted: deleted != 0,
        locked: locked != 0,
        samples_changed: samples_changed != 0,
        source,
        source_version,
        last_saved: DateTime::parse_from_rfc3339(&last_saved).unwrap().with_timezone(&Utc),
        kind,
        step_count: rollup.step_count,
        floors_ascended: rollup.floors_ascended,
        floors_descended: rollup.floors_descended,
        altitude_mean: rollup.altitude_mean,
        energy_kcal: rollup.energy_kcal,
        heart_rate_mean: rollup.heart_rate_mean,
        heart_rate_max: rollup.heart_rate_max,
    }))
}

fn sync_item_rtree(conn: &Connection, item: &TimelineItemBase) -> Result<()> {
    if let Some(visit) = item.as_visit() {
        let rowid = rtree_rowid(item.id);
        let (min_lon, max_lon, min_lat, max_lat) = bbox_for(visit.center_longitude, visit.center_latitude, visit.radius_mean);
        conn.execute(
            "INSERT INTO item_rtree (id, min_lon, max_lon, min_lat, max_lat) VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(id) DO UPDATE SET min_lon=excluded.min_lon, max_lon=excluded.max_lon, min_lat=excluded.min_lat, max_lat=excluded.max_lat",
            params![rowid, min_lon, max_lon, min_lat, max_lat],
        )?;
    }
    Ok(())
}

fn insert_place(conn: &Connection, place: &Place) -> Result<()> {
    let payload = serde_json::to_string(place)?;
    conn.execute(
        "INSERT INTO places (id, name, center_latitude, center_longitude, radius_mean, radius_sd, payload, visit_count, last_saved)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
         ON CONFLICT(id) DO UPDATE SET name=excluded.name, center_latitude=excluded.center_latitude,
            center_longitude=excluded.center_longitude, radius_mean=excluded.radius_mean, radius_sd=excluded.radius_sd,
            payload=excluded.payload, visit_count=excluded.visit_count, last_saved=excluded.last_saved",
        params![
            place.id.to_string(),
            place.name,
            place.center_latitude,
            place.center_longitude,
            place.radius_mean,
            place.radius_sd,
            payload,
            place.visit_count as i64,
            place.last_saved.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn sync_place_rtree(conn: &Connection, place: &Place) -> Result<()> {
    let rowid = rtree_rowid(place.id);
    let (min_lon, max_lon, min_lat, max_lat) = bbox_for(place.center_longitude, place.center_latitude, place.radius_mean);
    conn.execute(
        "INSERT INTO place_rtree (id, min_lon, max_lon, min_lat, max_lat) VALUES (?1,?2,?3,?4,?5)
         ON CONFLICT(id) DO UPDATE SET min_lon=excluded.min_lon, max_lon=excluded.max_lon, min_lat=excluded.min_lat, max_lat=excluded.max_lat",
        params![rowid, min_lon, max_lon, min_lat, max_lat],
    )?;
    Ok(())
}

fn bbox_for(lon: f64, lat: f64, radius_meters: f64) -> (f64, f64, f64, f64) {
    let rect = crate::spatial::expand_bbox(
        &geo::Rect::new(geo::coord! { x: lon, y: lat }, geo::coord! { x: lon, y: lat }),
        radius_meters,
    );
    (rect.min().x, rect.max().x, rect.min().y, rect.max().y)
}

/// SQLite's `rtree` module keys rows by integer rowid; ids are hashed down
/// from their UUID rather than stored verbatim.
pub(crate) fn rtree_rowid<T>(id: crate::ids::Id<T>) -> i64 {
    let bytes = id.as_uuid().as_u64_pair();
    (bytes.0 ^ bytes.1) as i64 & 0x7fff_ffff_ffff_ffff
}
