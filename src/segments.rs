use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{EepError, Result};
use crate::types::{HeaderInfo, Segment};
use crate::utils::{day_to_posix, parse_f64, parse_i64};

const SEGMENT_COUNT_KEY: &str = "NumberSegments=";

/// A segment listed in the `.seg` sidecar (every segment but the first)
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRow {
    pub start_time: f64,
    pub sample_count: i64,
}

/// Reads the segment sidecar as text.
///
/// A missing file is reported as `EepError::SegmentFileMissing` so the
/// caller can fall back to a single segment.
pub fn read_segment_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(EepError::SegmentFileMissing(path.display().to_string()))
        }
        Err(e) => Err(EepError::Io(e)),
    }
}

/// Parses `NumberSegments=<N>` followed by `N - 1` rows of `day fraction samples`
pub fn parse_segment_file(text: &str) -> Result<Vec<SegmentRow>> {
    let start = text
        .find(SEGMENT_COUNT_KEY)
        .ok_or_else(|| EepError::InvalidFormat("segment file lacks NumberSegments".to_string()))?;
    let rest = text[start + SEGMENT_COUNT_KEY.len()..].trim_start();

    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let count: usize = rest[..digits]
        .parse()
        .map_err(|_| EepError::InvalidFormat("segment count is not a number".to_string()))?;
    if count == 0 {
        return Err(EepError::InvalidFormat("segment file declares zero segments".to_string()));
    }

    let mut rows = Vec::with_capacity(count - 1);
    for line in rest[digits..].lines() {
        if rows.len() == count - 1 {
            break;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 3 {
            return Err(EepError::InvalidFormat(format!("segment row '{}' has too few fields", line.trim())));
        }

        let day = parse_f64(fields[0], "segment date")?;
        let fraction = parse_f64(fields[1], "segment fraction")?;
        let sample_count = parse_i64(fields[2], "segment sample count")?;

        rows.push(SegmentRow {
            start_time: day_to_posix(day, fraction),
            sample_count,
        });
    }

    if rows.len() != count - 1 {
        return Err(EepError::InvalidFormat(format!(
            "segment file declares {} segments but lists {}",
            count,
            rows.len() + 1
        )));
    }

    Ok(rows)
}

/// Builds the full segment table from the listed rows.
///
/// Segment 0 starts at the header's acquisition time and takes whatever
/// samples the listed segments leave over. Start samples are assigned from
/// the end backwards so the table covers `[0, sample_count)` exactly.
pub fn build_segments(rows: &[SegmentRow], header: &HeaderInfo) -> Result<Vec<Segment>> {
    let total = header.sample_count.ok_or(EepError::MissingHeaderField("Samples"))?;

    if let Some(row) = rows.iter().find(|r| r.sample_count < 0) {
        return Err(EepError::InvalidFormat(format!("negative segment length {}", row.sample_count)));
    }

    let listed = rows
        .iter()
        .try_fold(0i64, |acc, r| acc.checked_add(r.sample_count))
        .ok_or_else(|| EepError::InvalidFormat("listed segment lengths overflow".to_string()))?;
    let first_count = match total.checked_sub(listed) {
        Some(n) if n >= 0 => n,
        _ => {
            return Err(EepError::InvalidFormat(format!(
                "segments list {} samples but the recording holds {}",
                listed, total
            )))
        }
    };

    let mut segments = Vec::with_capacity(rows.len() + 1);
    segments.push(Segment {
        identifier: 0,
        start_time: header.acquisition_time.unwrap_or(f64::NAN),
        start_sample: 0,
        sample_count: first_count,
    });
    for (i, row) in rows.iter().enumerate() {
        segments.push(Segment {
            identifier: i + 1,
            start_time: row.start_time,
            start_sample: 0,
            sample_count: row.sample_count,
        });
    }

    // 反向累加计算起始样本
    let mut remaining = total;
    for segment in segments.iter_mut().rev() {
        remaining -= segment.sample_count;
        segment.start_sample = remaining;
    }

    Ok(segments)
}

/// Builds the segment table from the sidecar text, or from the single-segment
/// fallback when there is no sidecar
pub fn load_segments(text: Option<&str>, header: &HeaderInfo) -> Result<Vec<Segment>> {
    let rows = match text {
        Some(text) => parse_segment_file(text)?,
        None => Vec::new(),
    };

    let segments = build_segments(&rows, header)?;
    debug!(segments = segments.len(), "built segment table");
    Ok(segments)
}

/// Reads the sidecar at `path`, falling back to a single segment when it is absent
pub fn read_segments<P: AsRef<Path>>(path: P, header: &HeaderInfo) -> Result<Vec<Segment>> {
    match read_segment_file(path) {
        Ok(text) => load_segments(Some(&text), header),
        Err(EepError::SegmentFileMissing(path)) => {
            warn!(%path, "no segment file, assuming a single segment");
            load_segments(None, header)
        }
        Err(e) => Err(e),
    }
}
