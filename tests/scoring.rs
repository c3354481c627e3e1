use proctor_kernel::{
    build_integrity_timeline, build_report, compute_integrity_score, count_events_by_type,
    segment_episodes, EventCounts, EventType, ProctorEvent,
};

fn log(entries: &[(i64, EventType)]) -> Vec<ProctorEvent> {
    entries.iter()
        .enumerate()
        .map(|(i, (ts, ty))| ProctorEvent::with_id(format!("ev-{}", i), *ty, *ts))
        .collect()
}

fn mixed_log() -> Vec<ProctorEvent> {
    let mut entries = Vec::new();
    for i in 0..40 {
        let ty = EventType::ALL[(i * 7 + 3) % EventType::ALL.len()];
        entries.push((((i * 37) % 23) as i64 * 100, ty));
    }
    log(&entries)
}

#[test]
fn score_never_increases_as_events_accumulate() {
    let events = mixed_log();
    let mut previous = 100;
    for n in 0..=events.len() {
        let score = compute_integrity_score(&count_events_by_type(&events[..n]));
        assert!(score <= previous);
        previous = score;
    }
    assert_eq!(previous, 0);
}

#[test]
fn timeline_is_monotone_and_ends_at_report_score() {
    let events = log(&[
        (500, EventType::LookingAway),
        (100, EventType::NotesDetected),
        (300, EventType::ExtraDeviceDetected),
    ]);
    let timeline = build_integrity_timeline(&events, 0, 1_000);
    let ts: Vec<i64> = timeline.iter().map(|p| p.ts).collect();
    assert_eq!(ts, vec![0, 100, 300, 500, 1_000]);
    assert!(timeline.windows(2).all(|w| w[1].score <= w[0].score));

    let report = build_report("s-1", &events, 0, 1_000);
    assert_eq!(report.integrity_score, 70);
    assert_eq!(timeline.last().unwrap().score, report.integrity_score);
    assert_eq!(report.duration_ms, 1_000);
}

#[test]
fn episodes_partition_the_log() {
    let events = mixed_log();
    let episodes = segment_episodes(&events, 250);
    let total: u32 = episodes.iter().map(|e| e.count).sum();
    assert_eq!(total as usize, events.len());
    for ep in &episodes {
        assert!(ep.started_at <= ep.ended_at);
    }

    // A zero gap never merges: every event is its own episode.
    assert_eq!(segment_episodes(&events, 0).len(), events.len());
}

#[test]
fn report_serializes_with_wire_names() {
    let events = log(&[(10, EventType::MultipleFaces)]);
    let json = serde_json::to_value(build_report("s-9", &events, 0, 20)).unwrap();
    assert_eq!(json["sessionId"], "s-9");
    assert_eq!(json["integrityScore"], 85);
    assert_eq!(json["countsByType"]["MultipleFaces"], 1);
    assert_eq!(json["countsByType"]["PhoneDetected"], 0);
    assert_eq!(json["timeline"].as_array().unwrap().len(), 3);
}

#[test]
fn counts_round_trip_through_json() {
    let mut counts = EventCounts::default();
    counts.set(EventType::PhoneDetected, 2);
    counts.increment(EventType::NoFace);
    let json = serde_json::to_string(&counts).unwrap();
    let back: EventCounts = serde_json::from_str(&json).unwrap();
    assert_eq!(back.total(), 3);
    assert_eq!(compute_integrity_score(&back), 50);
}
