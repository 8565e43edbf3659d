// tests/e2e.rs
//
// Whole-pipeline scenarios: registry -> session -> frame processor, driven
// frame by frame with explicit timestamps.

use parking_occupancy::occupancy::{OccupancyStatus, TransitionCause};
use parking_occupancy::pipeline::PipelineEvent;
use parking_occupancy::{
    Config, Detection, FrameInput, FrameProcessor, ParkingRegistry, ParkingSession, Point2, Vec3,
};

const TICK_MS: u64 = 150;

/// Three unit squares centered at x = 0, 10, 20.
fn three_spaces() -> ParkingRegistry {
    let square = |cx: f64| {
        vec![
            Point2::new(cx - 0.5, -0.5),
            Point2::new(cx + 0.5, -0.5),
            Point2::new(cx + 0.5, 0.5),
            Point2::new(cx - 0.5, 0.5),
        ]
    };
    ParkingRegistry::load(&[square(0.0), square(10.0), square(20.0)]).unwrap()
}

fn session() -> ParkingSession {
    ParkingSession::from_config(three_spaces(), &Config::default(), 0).unwrap()
}

fn car(x: f64, y: f64, frame: u64) -> Detection {
    Detection::new(Vec3::new(x, y, 0.0), 0.0, Vec3::new(4.5, 1.8, 1.5), frame)
}

fn frame(index: u64, detections: Vec<Detection>) -> FrameInput {
    FrameInput::detections(index, index * TICK_MS, detections)
}

#[test]
fn single_detection_occupies_its_space() {
    let mut s = session();
    let mut p = FrameProcessor::new(150);

    let out = p.process(&mut s, frame(1, vec![car(0.0, 0.0, 1)]));

    assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));
    assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));
    assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Free));

    // Created tracks report the raw detection.
    assert_eq!(out.poses_for("1").len(), 1);
    assert_eq!(out.poses_for("1")[0].position, Vec3::new(0.0, 0.0, 0.0));
    assert!(out.poses_for("2").is_empty());

    assert_eq!(out.summary.occupied, 1);
    assert_eq!(out.summary.free, 2);
    assert_eq!(out.events.len(), 3, "every space left unknown");
}

#[test]
fn occupied_space_is_debounced_before_freeing() {
    let mut s = session();
    let mut p = FrameProcessor::new(150);

    for i in 1..=3 {
        p.process(&mut s, frame(i, vec![car(0.1, -0.1, i)]));
    }
    assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));

    // Frame 4 is empty: well inside the 5 s debounce window.
    p.process(&mut s, frame(4, vec![]));
    assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));

    let mut freed_at = None;
    for i in 5..=60 {
        let out = p.process(&mut s, frame(i, vec![]));
        if out.events.iter().any(|e| e.uid == "1" && e.to == OccupancyStatus::Free) {
            freed_at = Some(i);
            break;
        }
    }

    let freed_at = freed_at.expect("space 1 never freed");
    let record = s.occupancy.get("1").unwrap();
    let last = record.last_detection_ms.unwrap();
    assert!(freed_at * TICK_MS - last >= 5000);
    assert!((freed_at - 1) * TICK_MS - last < 5000, "freed later than needed");
    assert!(s.tracker.get("1").is_none(), "unobserved track was pruned");
}

#[test]
fn brief_gap_does_not_flicker() {
    let mut s = session();
    let mut p = FrameProcessor::new(150);

    p.process(&mut s, frame(1, vec![car(10.0, 0.0, 1)]));
    for i in 2..=5 {
        p.process(&mut s, frame(i, vec![]));
    }
    let out = p.process(&mut s, frame(6, vec![car(10.0, 0.0, 6)]));

    assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Occupied));
    assert!(out.events.iter().all(|e| e.uid != "2"));
}

#[test]
fn manual_lock_survives_empty_frames() {
    let mut s = session();
    let mut p = FrameProcessor::new(150);

    s.set_manual_status("3", OccupancyStatus::Occupied, 0).unwrap();
    for i in 1..=50 {
        p.process(&mut s, frame(i, vec![]));
    }
    assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Occupied));
    assert!(s.occupancy.get("3").unwrap().locked);

    // A detection on a locked free space changes nothing either.
    s.set_manual_status("2", OccupancyStatus::Free, 7500).unwrap();
    p.process(&mut s, frame(51, vec![car(10.0, 0.0, 51)]));
    assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));

    s.unlock("2", 7700).unwrap();
    p.process(&mut s, frame(52, vec![car(10.0, 0.0, 52)]));
    assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Occupied));

    let events = s.bus.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Occupancy(o) if o.cause == TransitionCause::Manual && o.uid == "3"
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Unlocked { uid, .. } if uid == "2")));
}

#[test]
fn target_reservation_roundtrip() {
    let mut s = session();
    let mut p = FrameProcessor::new(150);
    p.process(&mut s, frame(1, vec![car(0.0, 0.0, 1)]));

    assert!(!s.select_target("1", 200).unwrap(), "occupied space cannot be a target");
    assert!(s.select_target("2", 200).unwrap());
    assert!(s.select_target("3", 300).unwrap());
    assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));
    assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Target));

    let summary = s.occupancy.summary();
    assert_eq!(summary.target, 1);
    assert_eq!(summary.free, 2);
}

#[test]
fn replay_is_deterministic() {
    let script: Vec<Vec<Detection>> = (1..=40u64)
        .map(|i| match i {
            1..=10 => vec![car(0.2, 0.1, i), car(20.0, -0.2, i)],
            11..=20 => vec![car(20.1, 0.0, i), car(9.9, 0.3, i)],
            21..=25 => vec![],
            _ => vec![car(10.0, 0.0, i), car(f64::NAN, 0.0, i)],
        })
        .collect();

    let mut s = session();
    let mut p = FrameProcessor::new(150);

    let run = |s: &mut ParkingSession, p: &mut FrameProcessor| {
        let mut outputs = Vec::new();
        for (i, dets) in script.iter().enumerate() {
            let out = p.process(s, frame(i as u64 + 1, dets.clone()));
            outputs.push(serde_json::to_string(&out).unwrap());
        }
        (outputs, serde_json::to_string(&s.occupancy.snapshot()).unwrap())
    };

    let first = run(&mut s, &mut p);
    s.reset(0);
    p.reset();
    let second = run(&mut s, &mut p);

    assert_eq!(first, second);
}

#[test]
fn point_cloud_frame_marks_covered_spaces() {
    let mut s = session();
    let mut p = FrameProcessor::new(150);

    // A dense column of points over space 1 at the default slab height, and a
    // few stray points over space 2 well below the threshold.
    let mut points = Vec::new();
    for k in 0..50 {
        let t = k as f64 / 50.0 - 0.5;
        points.push(Vec3::new(t * 0.8, t * 0.4, 3.0));
    }
    points.push(Vec3::new(10.0, 0.0, 3.0));
    points.push(Vec3::new(10.1, 0.1, 3.0));

    let out = p.process(&mut s, FrameInput::point_cloud(1, 150, points));

    assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));
    assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));
    // Space 3 lies outside the cloud footprint and stays unobserved.
    assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Unknown));
    assert_eq!(out.poses_for("1").len(), 1);
}

#[test]
fn mixed_sources_in_one_tick_do_not_flap() {
    let mut s = session();
    let mut p = FrameProcessor::new(150);
    s.bus.drain();

    // Detections cover the whole lot; the cloud only sees space 1.
    let cloud = || -> Vec<Vec3> {
        (0..40)
            .map(|k| Vec3::new(-0.4 + k as f64 * 0.02, 0.1, 3.0))
            .collect()
    };

    for i in 1..=20 {
        let mut input = frame(i, vec![car(20.0, 0.0, i)]);
        input.merge(FrameInput::point_cloud(i, i * TICK_MS, cloud()));
        p.process(&mut s, input);

        assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));
        assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));
        assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Occupied));
    }

    // Only the first tick moved anything off the initial unknown state.
    let events = s.bus.drain();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| matches!(
        e,
        PipelineEvent::Occupancy(o)
            if o.from == OccupancyStatus::Unknown && o.cause == TransitionCause::Automatic
    )));
    assert_eq!(s.tracker.get("3").unwrap().hits, 20);
}

#[test]
fn detection_on_a_corner_occupies_the_space() {
    let diamond = vec![
        Point2::new(0.0, -2.0),
        Point2::new(2.0, 0.0),
        Point2::new(0.0, 2.0),
        Point2::new(-2.0, 0.0),
    ];
    let far = vec![
        Point2::new(10.0, -1.0),
        Point2::new(12.0, -1.0),
        Point2::new(12.0, 1.0),
        Point2::new(10.0, 1.0),
    ];
    let registry = ParkingRegistry::load(&[diamond, far]).unwrap();
    let mut s = ParkingSession::from_config(registry, &Config::default(), 0).unwrap();
    let mut p = FrameProcessor::new(150);

    let out = p.process(&mut s, frame(1, vec![car(0.0, 2.0, 1)]));

    assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));
    assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));
    assert_eq!(out.poses_for("1").len(), 1);
    assert!(out.free_roaming.is_empty());
}
