use serde_json::{json, Map};

use super::result::{DetectionBatch, ObjectDetection};
use crate::{EventType, ProctorEvent};

/// Integrity event for a detected class name; `None` for unmapped classes.
pub fn map_class_to_event(class_name: &str) -> Option<EventType> {
    match class_name.trim().to_ascii_lowercase().as_str() {
        "phone" => Some(EventType::PhoneDetected),
        "book" | "notebook" | "paper" => Some(EventType::NotesDetected),
        "laptop" | "keyboard" | "monitor" => Some(EventType::ExtraDeviceDetected),
        _ => None,
    }
}

/// Event for one detection, stamped with the analyzed frame time.
pub fn detection_event(
    detection: &ObjectDetection,
    timestamp: i64,
    frame_thumb: Option<String>,
) -> Option<ProctorEvent> {
    let event_type = map_class_to_event(&detection.class_name)?;
    let mut meta = Map::new();
    meta.insert("score".into(), json!(detection.score));
    meta.insert("bbox".into(), json!(detection.bbox));
    meta.insert("sourceTs".into(), json!(timestamp));
    Some(
        ProctorEvent::new(event_type, timestamp)
            .with_meta(meta)
            .with_frame_thumb(frame_thumb),
    )
}

/// Events for every mapped detection in a batch; all share one thumbnail.
pub fn batch_events(batch: &DetectionBatch, frame_thumb: Option<&str>) -> Vec<ProctorEvent> {
    batch
        .detections
        .iter()
        .filter_map(|d| detection_event(d, batch.timestamp, frame_thumb.map(str::to_owned)))
        .collect()
}
