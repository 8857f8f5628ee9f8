use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::utils::posix_to_datetime;

/// Recording parameters and acquisition metadata from the `eeph` and `info` chunks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderInfo {
    pub file_version: Option<String>,
    pub sample_rate: Option<f64>,
    pub sample_count: Option<i64>,
    pub channel_count: Option<usize>,
    pub acquisition_time: Option<f64>,   // POSIX秒
    pub subject_name: Option<String>,
    pub subject_birth: Option<String>,
    pub software_id: Option<String>,
    pub hardware_id: Option<String>,
    pub channels: Vec<ChannelRow>,
}

impl HeaderInfo {
    /// Acquisition start as a UTC timestamp, if the `info` chunk provided one
    pub fn acquisition_datetime(&self) -> Option<DateTime<Utc>> {
        self.acquisition_time.and_then(posix_to_datetime)
    }

    /// Channel labels in stored order
    pub fn channel_labels(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.label.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRow {
    pub label: String,
    pub calibration: f64,
    pub unit: String,
    pub reference: String,
}

impl ChannelRow {
    /// 转换到SI单位（伏特）的比例；未知单位返回None
    pub fn si_scale(&self) -> Option<f64> {
        match self.unit.as_str() {
            "uV" | "µV" | "μV" => Some(1e-6),
            "V" => Some(1.0),
            _ => None,
        }
    }
}

/// One contiguous acquisition run
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub identifier: usize,
    pub start_time: f64,      // POSIX秒，缺失时为NaN
    pub start_sample: i64,
    pub sample_count: i64,
}

impl Segment {
    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        posix_to_datetime(self.start_time)
    }

    /// One past the last sample index covered by this segment
    pub fn end_sample(&self) -> i64 {
        self.start_sample + self.sample_count
    }
}

/// A self-describing value attached to an event through an epoch descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Empty,
    Int16(i16),
    Int32(i32),
    Float32(f32),
    Float64(f64),
    UnicodeString(String),
    Float32Array(Vec<f32>),
}

impl TypedValue {
    /// Scalar numeric payloads widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Int16(v) => Some(*v as f64),
            TypedValue::Int32(v) => Some(*v as f64),
            TypedValue::Float32(v) => Some(*v as f64),
            TypedValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::UnicodeString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f32_array(&self) -> Option<&[f32]> {
        match self {
            TypedValue::Float32Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TypedValue::Empty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochDescriptor {
    pub name: String,
    pub value: TypedValue,
    pub unit: String,
}

/// Fields shared by every decoded event class
#[derive(Debug, Clone, PartialEq)]
pub struct EventInfo {
    pub id: i32,
    pub class_name: String,
    pub name: String,           // 内部名称
    pub display_name: String,
    pub event_type: i32,
    pub state: i32,
    pub original: i8,
    pub duration: f64,
    pub offset: f64,
    pub timestamp: f64,         // POSIX秒
    pub descriptors: Vec<EpochDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerInfo {
    pub active_channel: String,
    pub reference_channel: String,
    pub description: String,
    pub show_amplitude: i32,
    pub show_duration: i8,
}

/// A decoded record of the event library
#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    Epoch(EventInfo),
    Marker { event: EventInfo, marker: MarkerInfo },
}

impl EventRecord {
    pub fn info(&self) -> &EventInfo {
        match self {
            EventRecord::Epoch(event) => event,
            EventRecord::Marker { event, .. } => event,
        }
    }

    /// Display description: the marker text, or the internal name for epochs
    pub fn description(&self) -> &str {
        match self {
            EventRecord::Epoch(event) => &event.name,
            EventRecord::Marker { marker, .. } => &marker.description,
        }
    }

    pub fn kind(&self) -> TimelineKind {
        match self {
            EventRecord::Epoch(_) => TimelineKind::Epoch,
            EventRecord::Marker { .. } => TimelineKind::Marker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKind {
    Marker,
    Epoch,
    Segment,
}

/// One entry of the merged, onset-sorted timeline
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub name: String,
    pub onset: f64,            // 相对记录开始的秒数
    pub sample: i64,
    pub value: TypedValue,
    pub duration: f64,
    pub description: String,
    pub timestamp: f64,        // POSIX秒
}

impl TimelineEntry {
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        posix_to_datetime(self.timestamp)
    }
}

/// Electrode impedances measured at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct Impedance {
    pub time: f64,
    pub unit: String,
    /// `(channel label, value)` pairs in channel table order
    pub measurement: Vec<(String, f32)>,
}

impl Impedance {
    /// Value of the first channel carrying `label`
    pub fn get(&self, label: &str) -> Option<f32> {
        self.measurement
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| *v)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.measurement.iter().map(|(l, _)| l.as_str()).collect()
    }
}

/// Reference to a video file recorded alongside the EEG
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRef {
    pub onset: f64,
    pub duration: f64,
    pub description: String,
    pub filename: String,
}

/// Everything decoded from one recording
#[derive(Debug, Clone, PartialEq)]
pub struct EepRecording {
    pub header: HeaderInfo,
    pub segments: Vec<Segment>,
    pub events: Vec<EventRecord>,
    pub timeline: Vec<TimelineEntry>,
    pub impedances: Vec<Impedance>,
    pub videos: Vec<VideoRef>,
}

/// What to do with an event whose timestamp precedes every segment start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedEventPolicy {
    /// Abort decoding with `EepError::UnresolvedEventSegment`
    #[default]
    Reject,
    /// Attach the event to the first segment
    ClampToFirst,
}

/// Options controlling how a recording and its sidecars are read
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub unresolved_events: UnresolvedEventPolicy,
    /// 默认：将容器路径的扩展名替换为 `.seg`
    pub segment_file: Option<PathBuf>,
    /// 默认：将容器路径的扩展名替换为 `.evt`
    pub event_file: Option<PathBuf>,
}

impl ReadOptions {
    pub fn with_unresolved_events(mut self, policy: UnresolvedEventPolicy) -> Self {
        self.unresolved_events = policy;
        self
    }

    pub fn with_segment_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.segment_file = Some(path.into());
        self
    }

    pub fn with_event_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.event_file = Some(path.into());
        self
    }
}
