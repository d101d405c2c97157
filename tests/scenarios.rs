//! End-to-end scenarios exercising the full pipeline: fixes in, a persisted
//! timeline out.

use chrono::{TimeZone, Utc};
use locomotion_core::{Config, LocomotionContext, RawFix};

fn fix(date: chrono::DateTime<chrono::Utc>, lat: f64, lon: f64) -> RawFix {
    RawFix {
        date,
        latitude: lat,
        longitude: lon,
        horizontal_accuracy: 10.0,
        altitude: None,
        vertical_accuracy: None,
        course: None,
        course_accuracy: None,
    }
}

#[test]
fn twelve_static_fixes_form_one_tight_visit() {
    let ctx = LocomotionContext::new(Config::default()).unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

    for i in 0..12 {
        ctx.record_fix(fix(base + chrono::Duration::seconds(i), 37.7749, -122.4194)).unwrap();
    }

    let open = ctx.timeline.flush().unwrap();
    assert!(open.is_visit());
    assert_eq!(open.sample_ids.len(), 12);
    let visit = open.as_visit().unwrap();
    assert!(visit.radius_mean <= 10.0);
}

#[test]
fn stationary_moving_stationary_closes_a_visit_then_a_trip() {
    // A short detector window keeps this test's transitions within a small
    // number of samples instead of needing a minutes-long synthetic stream.
    let config = Config::default().with_stationary_window_secs(5);
    let ctx = LocomotionContext::new(config).unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    let mut t = 0i64;

    for _ in 0..10 {
        ctx.record_fix(fix(base + chrono::Duration::seconds(t), 37.7749, -122.4194)).unwrap();
        t += 1;
    }
    for i in 0..100 {
        ctx.record_fix(fix(base + chrono::Duration::seconds(t), 37.7749 + i as f64 * 0.0005, -122.4194))
            .unwrap();
        t += 1;
    }
    for _ in 0..20 {
        ctx.record_fix(fix(base + chrono::Duration::seconds(t), 37.8249, -122.4194)).unwrap();
        t += 1;
    }

    let closed = ctx.timeline.drain_completed();
    assert_eq!(closed.len(), 2);
    assert!(closed[0].is_visit());
    assert!(closed[1].is_trip());
}

#[test]
fn export_then_import_round_trips_a_visit_into_a_fresh_store() {
    use locomotion_core::ids::ItemId;
    let dir = tempfile::tempdir().unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

    let visit = locomotion_core::TimelineItemVisit {
        place_id: None,
        confirmed_place: false,
        uncertain_place: true,
        custom_title: None,
        street_address: None,
        center_latitude: 37.7749,
        center_longitude: -122.4194,
        radius_mean: 8.0,
        radius_sd: 1.0,
    };
    let item = locomotion_core::TimelineItemBase::new_visit(base, base + chrono::Duration::minutes(30), visit);
    let item_id: ItemId = item.id;

    let config = Config::default();
    locomotion_core::exportimport::export_bucketed(
        dir.path(),
        std::slice::from_ref(&item),
        &[],
        &[],
        &config,
        None,
        &locomotion_core::cancel::CancelToken::new(),
    )
    .unwrap();

    let validated = locomotion_core::exportimport::validate_import(dir.path()).unwrap();
    let ctx = LocomotionContext::new(config).unwrap();
    locomotion_core::exportimport::commit_import(ctx.persistence.store(), validated, &locomotion_core::cancel::CancelToken::new())
        .unwrap();

    let stats = ctx.persistence.store().stats().unwrap();
    assert_eq!(stats.item_count, 1);
    let _ = item_id;
}

#[test]
fn deleting_the_middle_trip_bridges_visits_and_detaches_its_samples() {
    use locomotion_core::{ActivityType, TimelineItemBase, TimelineItemTrip, TimelineItemVisit};

    let ctx = LocomotionContext::new(Config::default()).unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

    let visit_a = TimelineItemBase::new_visit(
        base,
        base + chrono::Duration::minutes(5),
        TimelineItemVisit {
            place_id: None,
            confirmed_place: false,
            uncertain_place: true,
            custom_title: None,
            street_address: None,
            center_latitude: 37.77,
            center_longitude: -122.41,
            radius_mean: 10.0,
            radius_sd: 0.0,
        },
    );
    let mut trip_sample_ids = Vec::new();
    for _ in 0..3 {
        trip_sample_ids.push(locomotion_core::SampleId::new());
    }
    let mut trip = TimelineItemBase::new_trip(
        base + chrono::Duration::minutes(6),
        base + chrono::Duration::minutes(20),
        TimelineItemTrip {
            classified_activity_type: ActivityType::Walking,
            confirmed_type: Some(ActivityType::Walking),
            uncertain_activity_type: false,
            distance_meters: 500.0,
            speed_mean: 1.2,
        },
    );
    trip.sample_ids = trip_sample_ids.clone();
    let visit_b = TimelineItemBase::new_visit(
        base + chrono::Duration::minutes(21),
        base + chrono::Duration::minutes(30),
        TimelineItemVisit {
            place_id: None,
            confirmed_place: false,
            uncertain_place: true,
            custom_title: None,
            street_address: None,
            center_latitude: 37.78,
            center_longitude: -122.42,
            radius_mean: 10.0,
            radius_sd: 0.0,
        },
    );

    let visit_a_id = visit_a.id;
    let trip_id = trip.id;
    let visit_b_id = visit_b.id;

    for sample_id in &trip_sample_ids {
        let mut sample = locomotion_core::LocomotionSample::new(base + chrono::Duration::minutes(10), 37.775, -122.415, 10.0);
        sample.id = *sample_id;
        sample.timeline_item_id = Some(trip_id);
        ctx.persistence.store().put_sample(&sample).unwrap();
    }

    let items = vec![visit_a, trip, visit_b];
    ctx.timeline.run_processor_pass(ctx.persistence.store(), items.clone(), 60).unwrap();
    let deleted = ctx.timeline.delete_item(ctx.persistence.store(), items, trip_id).unwrap();
    assert!(deleted);

    let a = ctx.persistence.store().get_item(&visit_a_id).unwrap().unwrap();
    assert_eq!(a.next_item_id, Some(visit_b_id));

    let b = ctx.persistence.store().get_item(&visit_b_id).unwrap().unwrap();
    assert_eq!(b.previous_item_id, Some(visit_a_id));

    let deleted_item = ctx.persistence.store().get_item(&trip_id).unwrap().unwrap();
    assert!(deleted_item.deleted);

    for sample_id in &trip_sample_ids {
        let sample = ctx.persistence.store().get_sample(sample_id).unwrap().unwrap();
        assert!(sample.timeline_item_id.is_none());
    }
}

#[test]
fn confirming_a_sample_marks_its_cells_dirty_and_a_training_pass_installs_a_model() {
    use locomotion_core::classifier::{ActivityTypesModel, ModelTrainer};
    use locomotion_core::ActivityType;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes back a model that always predicts the dominant confirmed type
    /// in the CSV it was handed, by reading the training set's row count.
    struct StubTrainer {
        out_dir: PathBuf,
        calls: AtomicUsize,
    }

    impl ModelTrainer for StubTrainer {
        fn train(&self, csv_path: &Path, _target_column: &str) -> locomotion_core::Result<PathBuf> {
            let contents = std::fs::read_to_string(csv_path).unwrap();
            let rows = contents.lines().skip(1).count();
            assert!(rows >= 2, "training set should have the synthetic stationary row injected");

            let mut model = ActivityTypesModel::new("unused", 2);
            model.weights[ActivityType::Walking.index()][0] = 10.0;
            let out_path = self.out_dir.join("model.json");
            std::fs::write(&out_path, serde_json::to_string(&model).unwrap()).unwrap();
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(out_path)
        }
    }

    let ctx = LocomotionContext::new(Config::default().with_training_minimum_rows(1)).unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

    // A single confirmed Walking sample lands in a previously-uncovered cell.
    let sample = ctx.record_fix(fix(base, 12.3, 45.6)).unwrap();
    ctx.confirm_sample_activity_type(sample.id, ActivityType::Walking).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let trainer = StubTrainer { out_dir: dir.path().to_path_buf(), calls: AtomicUsize::new(0) };

    let ran = ctx.run_training_pass(&trainer).unwrap();
    assert!(ran);
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);

    let mut probe = locomotion_core::LocomotionSample::new(base, 12.3, 45.6, 10.0);
    probe.step_hz = Some(2.0);
    let probs = ctx.classifier.classify(&probe).unwrap();
    assert!(probs[ActivityType::Walking.index()] > probs[ActivityType::Stationary.index()]);
}

#[test]
fn conflicting_edges_are_rejected_before_anything_is_committed() {
    use locomotion_core::ids::ItemId;
    use locomotion_core::{TimelineItemBase, TimelineItemTrip};

    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    let shared_prev = ItemId::new();

    let mut a = TimelineItemBase::new_trip(
        base,
        base,
        TimelineItemTrip {
            classified_activity_type: locomotion_core::ActivityType::Walking,
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
            classified_activity_type: locomotion_core::ActivityType::Walking,
            confirmed_type: None,
            uncertain_activity_type: false,
            distance_meters: 0.0,
            speed_mean: 0.0,
        },
    );
    b.previous_item_id = Some(shared_prev);

    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().with_export_chunk_size(10);
    locomotion_core::exportimport::export_bucketed(dir.path(), &[a, b], &[], &[], &config, None, &locomotion_core::cancel::CancelToken::new()).unwrap();

    let result = locomotion_core::exportimport::validate_import(dir.path());
    assert!(result.is_err());
}

#[test]
fn pruning_thins_a_dense_stationary_visit_but_keeps_it_reconstructible() {
    let ctx = LocomotionContext::new(Config::default()).unwrap();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

    // A three-hour visit with a fix every 10s is far denser than the
    // rolling 2-minute window the pruning policy keeps.
    for i in 0..(3 * 60 * 6) {
        ctx.record_fix(fix(base + chrono::Duration::seconds(i * 10), 37.7749, -122.4194)).unwrap();
    }
    let item = ctx.timeline.flush().unwrap();
    let original_count = item.sample_ids.len();
    let removed = ctx.timeline.prune_item(ctx.persistence.store(), item.clone()).unwrap();
    assert!(removed > 0);
    assert!(removed < original_count);

    let pruned = ctx.persistence.store().get_item(&item.id).unwrap().unwrap();
    assert_eq!(pruned.sample_ids.len(), original_count - removed);
    assert!(pruned.sample_ids.len() >= 2);
}
