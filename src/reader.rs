use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EepError, Result};
use crate::events;
use crate::header;
use crate::raw::{self, RawLayout, SampleCodec, SampleMatrix};
use crate::riff;
use crate::segments;
use crate::timeline;
use crate::types::{
    EepRecording, EventRecord, HeaderInfo, Impedance, ReadOptions, Segment, TimelineEntry, VideoRef,
};

/// Decodes a recording from in-memory content.
///
/// `container` is the `.cnt` file, `segments` the text of the `.seg`
/// sidecar (`None` when there is none) and `events` the `.evt` sidecar.
/// Any format violation aborts the decode; no partial recording is returned.
///
/// # Examples
///
/// ```rust
/// use eepread::{decode, ReadOptions, TimelineKind};
/// use eepread::doctest_utils::simple_recording;
///
/// let start = 1_600_000_000.0;
/// let files = simple_recording(start);
///
/// let recording = decode(&files.cnt, None, &files.evt, &ReadOptions::default())?;
/// assert_eq!(recording.header.sample_rate, Some(100.0));
/// assert_eq!(recording.segments.len(), 1);
///
/// let kinds: Vec<TimelineKind> = recording.timeline.iter().map(|e| e.kind).collect();
/// assert_eq!(kinds, [TimelineKind::Segment, TimelineKind::Marker]);
/// assert_eq!(recording.timeline[1].sample, 50);
/// # Ok::<(), eepread::EepError>(())
/// ```
pub fn decode(
    container: &[u8],
    segments: Option<&str>,
    events: &[u8],
    options: &ReadOptions,
) -> Result<EepRecording> {
    let tree = riff::read_file(container)?;
    let header = header::read_header(&tree)?;
    let segments = segments::load_segments(segments, &header)?;
    let events = events::read_events(events)?;

    assemble(header, segments, events, options)
}

/// 合并头部、分段和事件，生成时间线
fn assemble(
    header: HeaderInfo,
    segments: Vec<Segment>,
    events: Vec<EventRecord>,
    options: &ReadOptions,
) -> Result<EepRecording> {
    let sample_rate = header
        .sample_rate
        .ok_or(EepError::MissingHeaderField("Sampling Rate"))?;

    let labels = header.channel_labels();
    let timeline = timeline::build_timeline(
        &events,
        &segments,
        &labels,
        sample_rate,
        options.unresolved_events,
    )?;

    Ok(EepRecording {
        header,
        segments,
        events,
        timeline: timeline.entries,
        impedances: timeline.impedances,
        videos: timeline.videos,
    })
}

/// EEProbe (`.cnt`) recording reader
///
/// Opening a recording decodes the container header, the `.seg` and `.evt`
/// sidecars and the merged timeline in one go. Files are only held open
/// while they are being read; sample data is decoded on demand by
/// [`EepReader::read_samples`].
///
/// # Examples
///
/// ```rust
/// use eepread::EepReader;
/// use eepread::doctest_utils::{simple_recording, PlainInt32Codec};
///
/// # let dir = tempfile::tempdir().unwrap();
/// # let path = dir.path().join("recording.cnt");
/// let files = simple_recording(1_600_000_000.0);
/// std::fs::write(&path, &files.cnt)?;
/// std::fs::write(path.with_extension("evt"), &files.evt)?;
///
/// let reader = EepReader::open(&path)?;
/// println!("Channels: {:?}", reader.header().channel_labels());
/// for entry in reader.timeline() {
///     println!("{:>8.3}s  {}", entry.onset, entry.description);
/// }
///
/// // The sample codec is supplied by the caller
/// let samples = reader.read_samples(&PlainInt32Codec)?;
/// assert_eq!(samples.sample_count, 1000);
/// assert_eq!(samples.get(2, 0), Some(1.0));
/// # Ok::<(), eepread::EepError>(())
/// ```
#[derive(Debug, Clone)]
pub struct EepReader {
    path: PathBuf,
    recording: EepRecording,
}

impl EepReader {
    /// Opens a recording with default options.
    ///
    /// The sidecars are looked up next to `path` with the extensions
    /// `.seg` and `.evt`.
    ///
    /// # Errors
    ///
    /// * `EepError::FileNotFound` - the container or the event sidecar is missing
    /// * `EepError::BadMagic` / `EepError::TruncatedFile` - not a valid container
    /// * `EepError::MissingChannelTable` - the header has no channel table
    /// * `EepError::NotImplementedEventClass` - the event file holds records
    ///   this decoder cannot represent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    /// Opens a recording with explicit options
    pub fn open_with<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let container = read_required(&path)?;
        let tree = riff::read_file(&container)?;
        let header = header::read_header(&tree)?;

        let seg_path = options
            .segment_file
            .clone()
            .unwrap_or_else(|| path.with_extension("seg"));
        let segments = segments::read_segments(&seg_path, &header)?;

        let evt_path = options
            .event_file
            .clone()
            .unwrap_or_else(|| path.with_extension("evt"));
        let events = events::read_events(&read_required(&evt_path)?)?;

        let recording = assemble(header, segments, events, &options)?;
        debug!(
            path = %path.display(),
            events = recording.events.len(),
            segments = recording.segments.len(),
            "opened recording"
        );

        Ok(EepReader { path, recording })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &HeaderInfo {
        &self.recording.header
    }

    pub fn segments(&self) -> &[Segment] {
        &self.recording.segments
    }

    /// Decoded event records in file order
    pub fn events(&self) -> &[EventRecord] {
        &self.recording.events
    }

    /// Events and segment boundaries sorted by onset
    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.recording.timeline
    }

    pub fn impedances(&self) -> &[Impedance] {
        &self.recording.impedances
    }

    pub fn videos(&self) -> &[VideoRef] {
        &self.recording.videos
    }

    pub fn recording(&self) -> &EepRecording {
        &self.recording
    }

    pub fn into_recording(self) -> EepRecording {
        self.recording
    }

    /// Decodes the calibrated samples of the whole recording.
    ///
    /// The container is read again; `codec` decompresses each epoch of the
    /// raw stream. Rows are samples, columns follow the header's channel table.
    pub fn read_samples<C: SampleCodec + ?Sized>(&self, codec: &C) -> Result<SampleMatrix> {
        let container = read_required(&self.path)?;
        let tree = riff::read_file(&container)?;
        let layout = RawLayout::from_tree(&tree)?;

        if layout.samples_per_epoch == 0 {
            warn!(path = %self.path.display(), "epoch table declares zero samples per epoch");
        }

        raw::read_samples(&layout, codec, &self.recording.header)
    }
}

/// 读取必需的文件，缺失时报告FileNotFound
fn read_required(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EepError::FileNotFound(format!("{}: {}", path.display(), e)),
        _ => EepError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctest_utils::*;
    use crate::types::{TimelineKind, TypedValue, UnresolvedEventPolicy};

    const T: f64 = 1_600_000_000.0;

    #[test]
    fn test_decode_simple_recording() {
        let files = simple_recording(T);
        let recording = decode(&files.cnt, None, &files.evt, &ReadOptions::default()).unwrap();

        assert_eq!(recording.header.acquisition_time, Some(T));
        assert_eq!(recording.header.subject_name.as_deref(), Some("Test Subject"));
        assert_eq!(recording.segments[0].start_time, T);
        assert_eq!(recording.segments[0].sample_count, 1000);

        let timeline = &recording.timeline;
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].kind, TimelineKind::Segment);
        assert_eq!(timeline[0].onset, 0.0);
        assert_eq!(timeline[1].kind, TimelineKind::Marker);
        assert_eq!(timeline[1].onset, 0.5);
        assert_eq!(timeline[1].sample, 50);
        assert_eq!(timeline[1].value, TypedValue::Int32(7));
        assert_eq!(timeline[1].description, "Stimulus");
    }

    #[test]
    fn test_decode_with_segments() {
        let files = simple_recording(T);
        let seg = seg_text(&[(T + 100.0, 400)]);
        let recording = decode(&files.cnt, Some(&seg), &files.evt, &ReadOptions::default()).unwrap();

        assert_eq!(recording.segments.len(), 2);
        assert_eq!(recording.segments[0].sample_count, 600);
        assert_eq!(recording.segments[1].start_sample, 600);
        assert_eq!(recording.timeline.len(), 3);
        assert_eq!(recording.timeline[2].onset, 6.0);
    }

    #[test]
    fn test_decode_requires_sample_rate() {
        let eeph = "[Samples]\n10\n[Basic Channel Data]\n;label calibration factor\nCz 1 1 uV A1\n";
        let cnt = riff_file("CNT ", &[chunk("eeph", eeph.as_bytes())]);
        let result = decode(&cnt, None, &event_file(&[]), &ReadOptions::default());
        assert!(matches!(result, Err(EepError::MissingHeaderField("Sampling Rate"))));
    }

    #[test]
    fn test_decode_unresolved_policy() {
        let files = simple_recording(T);
        let early = EventBuilder::marker(1, "x", "early", T - 1.0).build();
        let evt = event_file(&[early]);

        let result = decode(&files.cnt, None, &evt, &ReadOptions::default());
        assert!(matches!(result, Err(EepError::UnresolvedEventSegment { .. })));

        let options = ReadOptions::default().with_unresolved_events(UnresolvedEventPolicy::ClampToFirst);
        let recording = decode(&files.cnt, None, &evt, &options).unwrap();
        assert_eq!(recording.timeline[0].onset, -1.0);
    }

    #[test]
    fn test_open_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.cnt");
        assert!(matches!(EepReader::open(&path), Err(EepError::FileNotFound(_))));

        // 只有容器文件，缺少事件文件
        std::fs::write(&path, simple_recording(T).cnt).unwrap();
        assert!(matches!(EepReader::open(&path), Err(EepError::FileNotFound(_))));
    }

    #[test]
    fn test_open_with_explicit_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let files = simple_recording(T);
        let cnt = dir.path().join("a.cnt");
        let evt = dir.path().join("events.bin");
        let seg = dir.path().join("segments.txt");
        std::fs::write(&cnt, &files.cnt).unwrap();
        std::fs::write(&evt, &files.evt).unwrap();
        std::fs::write(&seg, seg_text(&[(T + 9.0, 100)])).unwrap();

        let options = ReadOptions::default().with_event_file(&evt).with_segment_file(&seg);
        let reader = EepReader::open_with(&cnt, options).unwrap();
        assert_eq!(reader.path(), cnt.as_path());
        assert_eq!(reader.segments().len(), 2);
        assert_eq!(reader.events().len(), 1);
        assert!(reader.impedances().is_empty());
        assert!(reader.videos().is_empty());
    }
}
