//! Integrity scoring.
//!
//! Pure functions over an event log. Every consumer sorts by `ts` first,
//! because the two analyzers emit in independent orders.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::{EventType, ProctorEvent};

pub const MAX_SCORE: u32 = 100;

/// Per-type event tally. Always carries all six event types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventCounts {
    counts: [u32; 6],
}

impl EventCounts {
    pub fn get(&self, ty: EventType) -> u32 {
        self.counts[ty.index()]
    }

    pub fn set(&mut self, ty: EventType, value: u32) {
        self.counts[ty.index()] = value;
    }

    pub fn increment(&mut self, ty: EventType) {
        let slot = &mut self.counts[ty.index()];
        *slot = slot.saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| *c as u64).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventType, u32)> + '_ {
        EventType::ALL.into_iter().map(move |ty| (ty, self.get(ty)))
    }
}

impl Serialize for EventCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(EventType::ALL.len()))?;
        for (ty, count) in self.iter() {
            map.serialize_entry(ty.as_str(), &count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = EventCounts;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of event type to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<EventCounts, A::Error> {
                let mut counts = EventCounts::default();
                while let Some(key) = access.next_key::<String>()? {
                    let value: u32 = access.next_value()?;
                    // Unknown keys are tolerated and dropped.
                    if let Ok(ty) = key.parse::<EventType>() {
                        counts.set(ty, value);
                    }
                }
                Ok(counts)
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}

/// Penalty per event. Exhaustive so a new event type must be priced here.
pub fn penalty_weight(ty: EventType) -> u32 {
    match ty {
        EventType::LookingAway => 5,
        EventType::NoFace => 10,
        EventType::MultipleFaces => 15,
        EventType::PhoneDetected => 20,
        EventType::NotesDetected => 10,
        EventType::ExtraDeviceDetected => 15,
    }
}

/// `clamp(100 - Σ weight × count, 0, 100)`.
pub fn compute_integrity_score(counts: &EventCounts) -> u32 {
    let penalty: u64 = counts
        .iter()
        .map(|(ty, count)| penalty_weight(ty) as u64 * count as u64)
        .sum();
    (MAX_SCORE as u64).saturating_sub(penalty) as u32
}

pub fn count_events_by_type(events: &[ProctorEvent]) -> EventCounts {
    let mut counts = EventCounts::default();
    for ev in events {
        counts.increment(ev.event_type());
    }
    counts
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelinePoint {
    pub ts: i64,
    pub score: u32,
}

fn sorted_by_ts(events: &[ProctorEvent]) -> Vec<&ProctorEvent> {
    let mut sorted: Vec<&ProctorEvent> = events.iter().collect();
    sorted.sort_by_key(|ev| ev.ts());
    sorted
}

/// Running score: a leading `(started_at, 100)`, one point per event in `ts`
/// order (duplicates kept), and a trailing `(ended_at, final)`.
pub fn build_integrity_timeline(
    events: &[ProctorEvent],
    started_at: i64,
    ended_at: i64,
) -> Vec<TimelinePoint> {
    let mut points = Vec::with_capacity(events.len() + 2);
    let mut running = EventCounts::default();
    points.push(TimelinePoint {
        ts: started_at,
        score: MAX_SCORE,
    });
    for ev in sorted_by_ts(events) {
        running.increment(ev.event_type());
        points.push(TimelinePoint {
            ts: ev.ts(),
            score: compute_integrity_score(&running),
        });
    }
    points.push(TimelinePoint {
        ts: ended_at,
        score: compute_integrity_score(&running),
    });
    points
}

/// A contiguous run of same-type events.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub started_at: i64,
    pub ended_at: i64,
    pub count: u32,
}

/// Group same-type events: a gap of at least `cooldown_ms` since the previous
/// event of that type opens a new episode.
pub fn segment_episodes(events: &[ProctorEvent], cooldown_ms: i64) -> Vec<Episode> {
    let mut out: Vec<Episode> = Vec::new();
    let mut open: [Option<usize>; 6] = [None; 6];

    for ev in sorted_by_ts(events) {
        let slot = &mut open[ev.event_type().index()];
        match *slot {
            Some(idx) if ev.ts() - out[idx].ended_at < cooldown_ms => {
                let ep = &mut out[idx];
                ep.ended_at = ev.ts();
                ep.count += 1;
            }
            _ => {
                out.push(Episode {
                    event_type: ev.event_type(),
                    started_at: ev.ts(),
                    ended_at: ev.ts(),
                    count: 1,
                });
                *slot = Some(out.len() - 1);
            }
        }
    }
    out
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub session_id: String,
    pub integrity_score: u32,
    pub counts_by_type: EventCounts,
    pub duration_ms: i64,
    pub timeline: Vec<TimelinePoint>,
}

/// Assemble the derived report. An `ended_at` before `started_at` is clamped
/// to `started_at`.
pub fn build_report(
    session_id: &str,
    events: &[ProctorEvent],
    started_at: i64,
    ended_at: i64,
) -> IntegrityReport {
    let ended_at = ended_at.max(started_at);
    let counts = count_events_by_type(events);
    IntegrityReport {
        session_id: session_id.to_string(),
        integrity_score: compute_integrity_score(&counts),
        counts_by_type: counts,
        duration_ms: ended_at - started_at,
        timeline: build_integrity_timeline(events, started_at, ended_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: &str, ts: i64, ty: EventType) -> ProctorEvent {
        ProctorEvent::with_id(id, ty, ts)
    }

    #[test]
    fn score_example() {
        let mut counts = EventCounts::default();
        counts.set(EventType::LookingAway, 1);
        counts.set(EventType::NoFace, 1);
        counts.set(EventType::PhoneDetected, 1);
        assert_eq!(compute_integrity_score(&counts), 65);
    }

    #[test]
    fn score_clamps_at_zero() {
        let mut counts = EventCounts::default();
        counts.set(EventType::PhoneDetected, u32::MAX);
        counts.set(EventType::MultipleFaces, 7);
        assert_eq!(compute_integrity_score(&counts), 0);
    }

    #[test]
    fn counts_serialize_with_all_six_keys() {
        let counts = EventCounts::default();
        let json = serde_json::to_value(counts).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 6);
        for ty in EventType::ALL {
            assert_eq!(obj[ty.as_str()], 0);
        }
    }

    #[test]
    fn counts_deserialize_ignores_unknown_keys() {
        let counts: EventCounts =
            serde_json::from_str(r#"{"NoFace": 2, "Sneezing": 9}"#).unwrap();
        assert_eq!(counts.get(EventType::NoFace), 2);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn timeline_example() {
        let events = vec![
            ev("b", 3000, EventType::NoFace),
            ev("a", 2000, EventType::LookingAway),
        ];
        let timeline = build_integrity_timeline(&events, 1000, 4000);
        let scores: Vec<u32> = timeline.iter().map(|p| p.score).collect();
        let stamps: Vec<i64> = timeline.iter().map(|p| p.ts).collect();
        assert_eq!(scores, vec![100, 95, 85, 85]);
        assert_eq!(stamps, vec![1000, 2000, 3000, 4000]);
    }

    #[test]
    fn timeline_keeps_duplicate_timestamps() {
        let events = vec![
            ev("a", 2000, EventType::NoFace),
            ev("b", 2000, EventType::NoFace),
        ];
        let timeline = build_integrity_timeline(&events, 0, 5000);
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline[1].ts, timeline[2].ts);
        assert_eq!(timeline[2].score, 80);
    }

    #[test]
    fn episodes_example() {
        let t = |n: i64| 1000 + n * 1000;
        let events = vec![
            ev("1", t(0), EventType::LookingAway),
            ev("2", t(1), EventType::LookingAway),
            ev("3", t(4), EventType::LookingAway),
            ev("4", t(4), EventType::NoFace),
            ev("5", t(6), EventType::NoFace),
            ev("6", t(10), EventType::NoFace),
        ];
        let episodes = segment_episodes(&events, 1500);
        let count_of = |ty: EventType| episodes.iter().filter(|e| e.event_type == ty).count();
        assert_eq!(count_of(EventType::LookingAway), 2);
        assert_eq!(count_of(EventType::NoFace), 3);

        let first = &episodes[0];
        assert_eq!(first.event_type, EventType::LookingAway);
        assert_eq!((first.started_at, first.ended_at, first.count), (1000, 2000, 2));
    }

    #[test]
    fn episode_gap_equal_to_cooldown_splits() {
        let events = vec![
            ev("1", 0, EventType::PhoneDetected),
            ev("2", 1500, EventType::PhoneDetected),
        ];
        assert_eq!(segment_episodes(&events, 1500).len(), 2);
        assert_eq!(segment_episodes(&events, 1501).len(), 1);
    }

    #[test]
    fn report_clamps_inverted_range() {
        let events = vec![ev("1", 50, EventType::NotesDetected)];
        let report = build_report("s-1", &events, 100, 40);
        assert_eq!(report.duration_ms, 0);
        assert_eq!(report.integrity_score, 90);
        assert_eq!(report.timeline.last().unwrap().ts, 100);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["countsByType"]["NotesDetected"], 1);
    }
}
