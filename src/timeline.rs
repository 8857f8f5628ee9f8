use tracing::{debug, warn};

use crate::error::{EepError, Result};
use crate::types::{
    EventRecord, Impedance, Segment, TimelineEntry, TimelineKind, TypedValue, UnresolvedEventPolicy,
    VideoRef,
};

pub const EPOCH_EVENT_DESCRIPTION: &str = "Epoch Event";
pub const IMPEDANCE_DESCRIPTION: &str = "Impedance";
pub const VIDEO_DESCRIPTION_PREFIX: &str = "Video";
pub const SEGMENT_DESCRIPTION: &str = "New segment";

/// Merged timeline together with the impedance and video records found in it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
    pub impedances: Vec<Impedance>,
    pub videos: Vec<VideoRef>,
}

/// Finds the segment an event timestamp belongs to: the latest segment that
/// started at or before it, the higher identifier winning ties.
pub fn owning_segment<'s>(
    segments: &'s [Segment],
    timestamp: f64,
    policy: UnresolvedEventPolicy,
) -> Result<&'s Segment> {
    let first = segments
        .first()
        .ok_or_else(|| EepError::InvalidFormat("segment table is empty".to_string()))?;

    let owner = segments
        .iter()
        .filter(|s| s.start_time <= timestamp)
        .max_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then(a.identifier.cmp(&b.identifier))
        });

    match (owner, policy) {
        (Some(segment), _) => Ok(segment),
        (None, UnresolvedEventPolicy::ClampToFirst) => Ok(first),
        (None, UnresolvedEventPolicy::Reject) => Err(EepError::UnresolvedEventSegment {
            timestamp,
            first_start: first.start_time,
        }),
    }
}

/// Builds the onset-sorted timeline from decoded events and the segment table.
///
/// Every segment contributes a `"New segment"` entry. Entries with equal
/// onsets keep their input order (events first, then segments).
pub fn build_timeline(
    events: &[EventRecord],
    segments: &[Segment],
    channel_labels: &[&str],
    sample_rate: f64,
    policy: UnresolvedEventPolicy,
) -> Result<Timeline> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(EepError::InvalidFormat(format!("invalid sampling rate {}", sample_rate)));
    }

    let mut merged: Vec<(TimelineEntry, Option<&EventRecord>)> =
        Vec::with_capacity(events.len() + segments.len());

    for record in events {
        let entry = event_entry(record, segments, sample_rate, policy)?;
        merged.push((entry, Some(record)));
    }

    for segment in segments {
        merged.push((segment_entry(segment, sample_rate), None));
    }

    // 稳定排序，保持同一时刻的原始顺序
    merged.sort_by(|a, b| a.0.onset.total_cmp(&b.0.onset));

    let mut impedances = Vec::new();
    let mut videos = Vec::new();
    for (entry, record) in &merged {
        let Some(record) = record else {
            continue;
        };

        if entry.description == IMPEDANCE_DESCRIPTION {
            if let Some(imp) = impedance_from(entry, record, channel_labels) {
                impedances.push(imp);
            }
        } else if entry.description.starts_with(VIDEO_DESCRIPTION_PREFIX) {
            if let Some(video) = video_from(entry, record) {
                videos.push(video);
            }
        }
    }

    let entries: Vec<TimelineEntry> = merged.into_iter().map(|(entry, _)| entry).collect();
    debug!(
        entries = entries.len(),
        impedances = impedances.len(),
        videos = videos.len(),
        "built timeline"
    );

    Ok(Timeline {
        entries,
        impedances,
        videos,
    })
}

fn event_entry(
    record: &EventRecord,
    segments: &[Segment],
    sample_rate: f64,
    policy: UnresolvedEventPolicy,
) -> Result<TimelineEntry> {
    let event = record.info();
    let segment = owning_segment(segments, event.timestamp, policy)?;

    // 相对所属段开始的时间
    let relative = event.timestamp - segment.start_time;
    let segment_onset = segment.start_sample as f64 / sample_rate;
    let sample = (relative * sample_rate).floor() as i64 + segment.start_sample;

    let description = record.description().to_string();
    let value = if description == EPOCH_EVENT_DESCRIPTION {
        match event.descriptors.first() {
            Some(desc) => desc.value.clone(),
            None => {
                warn!(id = event.id, "epoch event without descriptors, keeping its state");
                TypedValue::Int32(event.state)
            }
        }
    } else {
        TypedValue::Int32(event.state)
    };

    Ok(TimelineEntry {
        kind: record.kind(),
        name: event.name.clone(),
        onset: relative + segment_onset,
        sample,
        value,
        duration: event.duration,
        description,
        timestamp: event.timestamp,
    })
}

fn segment_entry(segment: &Segment, sample_rate: f64) -> TimelineEntry {
    TimelineEntry {
        kind: TimelineKind::Segment,
        name: "Segment".to_string(),
        onset: segment.start_sample as f64 / sample_rate,
        sample: segment.start_sample,
        value: TypedValue::Int32(0),
        duration: segment.sample_count as f64 / sample_rate,
        description: SEGMENT_DESCRIPTION.to_string(),
        timestamp: segment.start_time,
    }
}

/// 阻抗值与通道标签按顺序配对
fn impedance_from(entry: &TimelineEntry, record: &EventRecord, labels: &[&str]) -> Option<Impedance> {
    let event = record.info();
    let first = event.descriptors.first();

    let Some((values, unit)) = first.and_then(|d| d.value.as_f32_array().map(|v| (v, &d.unit))) else {
        warn!(id = event.id, "impedance event without a value array, skipped");
        return None;
    };

    if values.len() != labels.len() {
        warn!(values = values.len(), channels = labels.len(), "impedance values and channels differ in count");
    }

    let measurement: Vec<(String, f32)> = labels
        .iter()
        .zip(values.iter())
        .map(|(label, value)| (label.to_string(), *value))
        .collect();

    Some(Impedance {
        time: entry.timestamp,
        unit: unit.clone(),
        measurement,
    })
}

fn video_from(entry: &TimelineEntry, record: &EventRecord) -> Option<VideoRef> {
    let event = record.info();
    let Some(filename) = event.descriptors.get(1).and_then(|d| d.value.as_str()) else {
        warn!(id = event.id, "video event without a file name, skipped");
        return None;
    };

    Some(VideoRef {
        onset: entry.onset,
        duration: entry.duration,
        description: entry.description.clone(),
        filename: filename.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EpochDescriptor, EventInfo, MarkerInfo};

    const T: f64 = 1_600_000_000.0;

    fn info(id: i32, name: &str, timestamp: f64, descriptors: Vec<EpochDescriptor>) -> EventInfo {
        EventInfo {
            id,
            class_name: String::new(),
            name: name.to_string(),
            display_name: String::new(),
            event_type: 0,
            state: id * 10,
            original: 1,
            duration: 0.0,
            offset: 0.0,
            timestamp,
            descriptors,
        }
    }

    fn marker(id: i32, description: &str, timestamp: f64, descriptors: Vec<EpochDescriptor>) -> EventRecord {
        EventRecord::Marker {
            event: info(id, "Marker", timestamp, descriptors),
            marker: MarkerInfo {
                active_channel: String::new(),
                reference_channel: String::new(),
                description: description.to_string(),
                show_amplitude: 0,
                show_duration: 0,
            },
        }
    }

    fn descriptor(name: &str, value: TypedValue, unit: &str) -> EpochDescriptor {
        EpochDescriptor {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        }
    }

    fn segment(identifier: usize, start_time: f64, start_sample: i64, sample_count: i64) -> Segment {
        Segment {
            identifier,
            start_time,
            start_sample,
            sample_count,
        }
    }

    #[test]
    fn test_single_marker() {
        let events = vec![marker(1, "Stim", T + 0.5, vec![])];
        let segments = vec![segment(0, T, 0, 1000)];

        let timeline = build_timeline(&events, &segments, &[], 100.0, UnresolvedEventPolicy::Reject).unwrap();
        let entries = &timeline.entries;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, TimelineKind::Segment);
        assert_eq!(entries[0].onset, 0.0);
        assert_eq!(entries[0].duration, 10.0);
        assert_eq!(entries[0].description, "New segment");
        assert_eq!(entries[1].kind, TimelineKind::Marker);
        assert_eq!(entries[1].onset, 0.5);
        assert_eq!(entries[1].sample, 50);
        assert_eq!(entries[1].value, TypedValue::Int32(10));
    }

    #[test]
    fn test_events_in_later_segment() {
        // 第二段从样本600开始，墙钟时间晚了100秒
        let segments = vec![segment(0, T, 0, 600), segment(1, T + 100.0, 600, 400)];
        let events = vec![
            marker(1, "late", T + 101.0, vec![]),
            marker(2, "early", T + 2.0, vec![]),
        ];

        let timeline = build_timeline(&events, &segments, &[], 100.0, UnresolvedEventPolicy::Reject).unwrap();
        let onsets: Vec<f64> = timeline.entries.iter().map(|e| e.onset).collect();
        assert_eq!(onsets, [0.0, 2.0, 6.0, 7.0]);

        let late = &timeline.entries[3];
        assert_eq!(late.description, "late");
        assert_eq!(late.sample, 700);
    }

    #[test]
    fn test_sorted_output() {
        let segments = vec![segment(0, T, 0, 500), segment(1, T + 50.0, 500, 500)];
        let events: Vec<EventRecord> = (0..20)
            .map(|i| marker(i, "m", T + ((i * 37) % 90) as f64 + 0.25, vec![]))
            .collect();

        let timeline = build_timeline(&events, &segments, &[], 10.0, UnresolvedEventPolicy::Reject).unwrap();
        assert_eq!(timeline.entries.len(), 22);
        assert!(timeline.entries.windows(2).all(|w| w[0].onset <= w[1].onset));
    }

    #[test]
    fn test_ties_keep_decode_order() {
        let segments = vec![segment(0, T, 0, 100)];
        let events = vec![marker(1, "first", T + 1.0, vec![]), marker(2, "second", T + 1.0, vec![])];

        let timeline = build_timeline(&events, &segments, &[], 100.0, UnresolvedEventPolicy::Reject).unwrap();
        assert_eq!(timeline.entries[1].description, "first");
        assert_eq!(timeline.entries[2].description, "second");
    }

    #[test]
    fn test_owning_segment_ties() {
        let segments = vec![segment(0, T, 0, 10), segment(1, T, 10, 10), segment(2, T + 5.0, 20, 10)];
        let owner = owning_segment(&segments, T + 1.0, UnresolvedEventPolicy::Reject).unwrap();
        assert_eq!(owner.identifier, 1);
        let owner = owning_segment(&segments, T + 5.0, UnresolvedEventPolicy::Reject).unwrap();
        assert_eq!(owner.identifier, 2);
    }

    #[test]
    fn test_unresolved_event() {
        let segments = vec![segment(0, T, 0, 100)];
        let events = vec![marker(1, "too early", T - 3.0, vec![])];

        let result = build_timeline(&events, &segments, &[], 100.0, UnresolvedEventPolicy::Reject);
        assert!(matches!(
            result,
            Err(EepError::UnresolvedEventSegment { timestamp, first_start }) if timestamp == T - 3.0 && first_start == T
        ));

        let timeline = build_timeline(&events, &segments, &[], 100.0, UnresolvedEventPolicy::ClampToFirst).unwrap();
        let entry = &timeline.entries[0];
        assert_eq!(entry.onset, -3.0);
        assert_eq!(entry.sample, -300);
    }

    #[test]
    fn test_epoch_event_value_override() {
        let events = vec![
            EventRecord::Epoch(info(4, "Epoch Event", T + 1.0, vec![descriptor("Value", TypedValue::Float32(2.5), "")])),
            EventRecord::Epoch(info(5, "Epoch Event", T + 2.0, vec![])),
        ];
        let segments = vec![segment(0, T, 0, 1000)];

        let timeline = build_timeline(&events, &segments, &[], 100.0, UnresolvedEventPolicy::Reject).unwrap();
        assert_eq!(timeline.entries[1].kind, TimelineKind::Epoch);
        assert_eq!(timeline.entries[1].value, TypedValue::Float32(2.5));
        assert_eq!(timeline.entries[2].value, TypedValue::Int32(50));
    }

    #[test]
    fn test_impedances_and_videos() {
        let events = vec![
            marker(1, "Impedance", T + 1.0, vec![descriptor(
                "Impedances",
                TypedValue::Float32Array(vec![5.0, 12.0]),
                "kOhm",
            )]),
            marker(2, "Video start", T + 2.0, vec![
                descriptor("Start", TypedValue::Empty, ""),
                descriptor("File", TypedValue::UnicodeString("rec01.avi".to_string()), ""),
            ]),
            marker(3, "Video broken", T + 3.0, vec![]),
            marker(4, "Impedance", T + 4.0, vec![descriptor("x", TypedValue::Int32(1), "")]),
        ];
        let segments = vec![segment(0, T, 0, 1000)];

        let timeline =
            build_timeline(&events, &segments, &["Fp1", "Cz"], 100.0, UnresolvedEventPolicy::Reject).unwrap();

        assert_eq!(timeline.impedances.len(), 1);
        let imp = &timeline.impedances[0];
        assert_eq!(imp.time, T + 1.0);
        assert_eq!(imp.unit, "kOhm");
        assert_eq!(imp.measurement, [("Fp1".to_string(), 5.0), ("Cz".to_string(), 12.0)]);
        assert_eq!(imp.get("Cz"), Some(12.0));
        assert_eq!(imp.get("Pz"), None);

        assert_eq!(timeline.videos.len(), 1);
        let video = &timeline.videos[0];
        assert_eq!(video.onset, 2.0);
        assert_eq!(video.description, "Video start");
        assert_eq!(video.filename, "rec01.avi");
    }

    #[test]
    fn test_impedance_keeps_channel_order() {
        let events = vec![marker(1, "Impedance", T, vec![descriptor(
            "Impedances",
            TypedValue::Float32Array(vec![1.0, 2.0, 3.0]),
            "kOhm",
        )])];
        let segments = vec![segment(0, T, 0, 100)];

        // 标签未排序且有重复
        let timeline =
            build_timeline(&events, &segments, &["Oz", "A1", "A1"], 100.0, UnresolvedEventPolicy::Reject).unwrap();
        let imp = &timeline.impedances[0];

        assert_eq!(imp.labels(), ["Oz", "A1", "A1"]);
        assert_eq!(imp.measurement[2], ("A1".to_string(), 3.0));
        assert_eq!(imp.get("A1"), Some(2.0));
    }

    #[test]
    fn test_invalid_sample_rate() {
        let segments = vec![segment(0, T, 0, 10)];
        assert!(build_timeline(&[], &segments, &[], 0.0, UnresolvedEventPolicy::Reject).is_err());
        assert!(build_timeline(&[], &segments, &[], f64::NAN, UnresolvedEventPolicy::Reject).is_err());
    }
}
