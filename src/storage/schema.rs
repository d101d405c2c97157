//! Table, R-Tree and trigger definitions for the persisted store.
//!
//! Foreign keys are deferred (`PRAGMA defer_foreign_keys = ON`) so a single
//! transaction can insert an item and its sample rows, or rewrite the whole
//! `previous_item_id`/`next_item_id` chain, without caring about row order.
//! Triggers keep edges symmetric: writing `next_item_id` on one row updates
//! the referenced row's `previous_item_id` to match, and vice versa.

pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS samples (
    id              TEXT PRIMARY KEY,
    date            TEXT NOT NULL,
    latitude        REAL NOT NULL,
    longitude       REAL NOT NULL,
    altitude        REAL,
    horizontal_accuracy REAL NOT NULL,
    vertical_accuracy   REAL,
    course          REAL,
    course_accuracy REAL,
    speed           REAL,
    speed_accuracy  REAL,
    step_hz         REAL,
    xy_acceleration REAL,
    z_acceleration  REAL,
    heart_rate      REAL,
    moving_state    TEXT NOT NULL,
    recording_state TEXT NOT NULL,
    classifier_results TEXT,
    confirmed_type  INTEGER,
    timeline_item_id TEXT REFERENCES items(id) DEFERRABLE INITIALLY DEFERRED,
    last_saved      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_samples_date ON samples(date);
CREATE INDEX IF NOT EXISTS idx_samples_item ON samples(timeline_item_id);

CREATE TABLE IF NOT EXISTS items (
    id              TEXT PRIMARY KEY,
    previous_item_id TEXT REFERENCES items(id) DEFERRABLE INITIALLY DEFERRED,
    next_item_id    TEXT REFERENCES items(id) DEFERRABLE INITIALLY DEFERRED,
    start_date      TEXT NOT NULL,
    end_date        TEXT NOT NULL,
    disabled        INTEGER NOT NULL DEFAULT 0,
    deleted         INTEGER NOT NULL DEFAULT 0,
    locked          INTEGER NOT NULL DEFAULT 0,
    samples_changed INTEGER NOT NULL DEFAULT 1,
    source          TEXT NOT NULL,
    source_version  TEXT NOT NULL,
    last_saved      TEXT NOT NULL,
    kind            TEXT NOT NULL,
    payload         TEXT NOT NULL,
    rollup          TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_items_start ON items(start_date);
CREATE INDEX IF NOT EXISTS idx_items_prev ON items(previous_item_id);
CREATE INDEX IF NOT EXISTS idx_items_next ON items(next_item_id);

CREATE TABLE IF NOT EXISTS places (
    id              TEXT PRIMARY KEY,
    name            TEXT,
    center_latitude REAL NOT NULL,
    center_longitude REAL NOT NULL,
    radius_mean     REAL NOT NULL,
    radius_sd       REAL NOT NULL,
    payload         TEXT NOT NULL,
    visit_count     INTEGER NOT NULL DEFAULT 0,
    last_saved      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_models (
    geo_key         TEXT PRIMARY KEY,
    depth           INTEGER NOT NULL,
    sample_count    INTEGER NOT NULL,
    payload         TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS place_rtree USING rtree(
    id,
    min_lon, max_lon,
    min_lat, max_lat
);

CREATE VIRTUAL TABLE IF NOT EXISTS item_rtree USING rtree(
    id,
    min_lon, max_lon,
    min_lat, max_lat
);

-- Edge symmetry: writing one side of a previous/next pair heals the other.
CREATE TRIGGER IF NOT EXISTS trg_items_next_sync
AFTER UPDATE OF next_item_id ON items
WHEN NEW.next_item_id IS NOT NULL
BEGIN
    UPDATE items SET previous_item_id = NEW.id
    WHERE id = NEW.next_item_id AND (previous_item_id IS NULL OR previous_item_id != NEW.id);
END;

CREATE TRIGGER IF NOT EXISTS trg_items_previous_sync
AFTER UPDATE OF previous_item_id ON items
WHEN NEW.previous_item_id IS NOT NULL
BEGIN
    UPDATE items SET next_item_id = NEW.id
    WHERE id = NEW.previous_item_id AND (next_item_id IS NULL OR next_item_id != NEW.id);
END;

-- Disabled propagation: disabling an item with no samples of its own marks
-- it deleted rather than leaving a dangling disabled stub.
CREATE TRIGGER IF NOT EXISTS trg_items_disabled_empty
AFTER UPDATE OF disabled ON items
WHEN NEW.disabled = 1 AND NOT EXISTS (SELECT 1 FROM samples WHERE timeline_item_id = NEW.id)
BEGIN
    UPDATE items SET deleted = 1 WHERE id = NEW.id;
END;
"#;
