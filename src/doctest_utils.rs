// Internal utilities for documentation tests and the test suites
// Builders that synthesize container, event and segment files in memory

use crate::error::{EepError, Result};
use crate::events::EventClass;
use crate::raw::{DecodedBlock, SampleCodec};
use crate::{EEP_DAY_SECONDS, EEP_EPOCH_OFFSET, EEP_LIBRARY_CLASS};

/// A chunk of a synthetic container file
#[derive(Debug, Clone)]
pub enum Chunk {
    Data { label: [u8; 4], data: Vec<u8> },
    List { label: [u8; 4], children: Vec<Chunk> },
}

fn fourcc(label: &str) -> [u8; 4] {
    let mut out = [b' '; 4];
    for (dst, src) in out.iter_mut().zip(label.bytes()) {
        *dst = src;
    }
    out
}

/// Data chunk; labels shorter than four bytes are space padded
pub fn chunk(label: &str, data: &[u8]) -> Chunk {
    Chunk::Data {
        label: fourcc(label),
        data: data.to_vec(),
    }
}

/// `LIST` chunk with the given sub-label
pub fn list(label: &str, children: &[Chunk]) -> Chunk {
    Chunk::List {
        label: fourcc(label),
        children: children.to_vec(),
    }
}

fn put_length(out: &mut Vec<u8>, length: usize, width: usize) {
    out.extend_from_slice(&(length as u64).to_le_bytes()[..width]);
}

fn encode_chunk(out: &mut Vec<u8>, chunk: &Chunk, width: usize) {
    match chunk {
        Chunk::Data { label, data } => {
            out.extend_from_slice(label);
            put_length(out, data.len(), width);
            out.extend_from_slice(data);
            if data.len() % 2 == 1 {
                out.push(0);
            }
        }
        Chunk::List { label, children } => {
            let body = encode_children(children, width);
            out.extend_from_slice(b"LIST");
            put_length(out, body.len() + 4, width);
            out.extend_from_slice(label);
            out.extend_from_slice(&body);
        }
    }
}

fn encode_children(children: &[Chunk], width: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for child in children {
        encode_chunk(&mut body, child, width);
    }
    body
}

fn container(magic: &[u8; 4], form: &str, children: &[Chunk], width: usize) -> Vec<u8> {
    let body = encode_children(children, width);
    let mut out = Vec::with_capacity(body.len() + 16);
    out.extend_from_slice(magic);
    put_length(&mut out, body.len() + 4, width);
    out.extend_from_slice(&fourcc(form));
    out.extend_from_slice(&body);
    out
}

/// Complete RIFF file (4-byte length fields)
pub fn riff_file(form: &str, children: &[Chunk]) -> Vec<u8> {
    container(b"RIFF", form, children, 4)
}

/// Complete RF64 file (8-byte length fields)
pub fn rf64_file(form: &str, children: &[Chunk]) -> Vec<u8> {
    container(b"RF64", form, children, 8)
}

/// Text of an `eeph` chunk; channels are `(label, calib_a, calib_b, unit, reference)`
pub fn eeph_text(sample_rate: f64, samples: i64, channels: &[(&str, f64, f64, &str, &str)]) -> String {
    let mut text = format!(
        "[File Version]\n4.0\n[Sampling Rate]\n{:.10}\n[Samples]\n{}\n[Channels]\n{}\n[Basic Channel Data]\n;label    calibration factor\n",
        sample_rate,
        samples,
        channels.len()
    );
    for (label, a, b, unit, reference) in channels {
        text.push_str(&format!("{} {:e} {:e} {} {}\n", label, a, b, unit, reference));
    }
    text
}

/// Splits a POSIX time into the day count and seconds stored in EEP files
pub fn posix_to_day(seconds: f64) -> (f64, f64) {
    (EEP_EPOCH_OFFSET / EEP_DAY_SECONDS, seconds)
}

/// Text of an `info` chunk starting at `start` (POSIX seconds)
pub fn info_text(start: f64, subject: &str) -> String {
    let (day, fraction) = posix_to_day(start);
    format!(
        "[StartDate]\n{}\n[StartFraction]\n{}\n[MachineMake]\neepread\n[MachineModel]\ntest-amp\n[SubjectName]\n{}\n",
        day, fraction, subject
    )
}

/// Segment sidecar text; rows are `(start POSIX seconds, sample count)`
pub fn seg_text(rows: &[(f64, i64)]) -> String {
    let mut text = format!("NumberSegments={}\n", rows.len() + 1);
    for (start, count) in rows {
        let (day, fraction) = posix_to_day(*start);
        text.push_str(&format!("{} {} {}\n", day, fraction, count));
    }
    text
}

/// Length-prefixed string as stored in event files
pub fn put_string(out: &mut Vec<u8>, s: &str) {
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

/// Class tag `-1` followed by the class name
pub fn put_class(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(&(-1i32).to_le_bytes());
    put_string(out, name);
}

/// The 24-byte event file preamble
pub fn event_file_header(compress: i32, encrypt: i32) -> Vec<u8> {
    let mut out = Vec::new();
    for part in [2024u32, 1, 1] {
        out.extend_from_slice(&part.to_le_bytes());
    }
    out.extend_from_slice(&103i32.to_le_bytes());
    out.extend_from_slice(&compress.to_le_bytes());
    out.extend_from_slice(&encrypt.to_le_bytes());
    out
}

/// Complete event library named `"Events"` holding `records`
pub fn event_file(records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = event_file_header(0, 0);
    put_class(&mut out, EEP_LIBRARY_CLASS);
    put_string(&mut out, "Events");
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        out.extend_from_slice(record);
    }
    out
}

/// A record that only carries its class name, for classes without a known body
pub fn unimplemented_record(class_name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    put_class(&mut out, class_name);
    out.extend_from_slice(&[0u8; 32]);
    out
}

pub fn value_empty() -> Vec<u8> {
    0i16.to_le_bytes().to_vec()
}

pub fn value_i32(v: i32) -> Vec<u8> {
    let mut out = 3i16.to_le_bytes().to_vec();
    out.extend_from_slice(&v.to_le_bytes());
    out
}

pub fn value_f32(v: f32) -> Vec<u8> {
    let mut out = 4i16.to_le_bytes().to_vec();
    out.extend_from_slice(&v.to_le_bytes());
    out
}

pub fn value_f64(v: f64) -> Vec<u8> {
    let mut out = 5i16.to_le_bytes().to_vec();
    out.extend_from_slice(&v.to_le_bytes());
    out
}

/// UTF-16LE string value without byte-order mark
pub fn value_unicode(s: &str) -> Vec<u8> {
    let units: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let mut out = 8i16.to_le_bytes().to_vec();
    out.extend_from_slice(&(units.len() as i32).to_le_bytes());
    out.extend_from_slice(&units);
    out
}

/// Float array value (type tag 512, element type float32)
pub fn value_f32_array(values: &[f32]) -> Vec<u8> {
    let mut out = 512i16.to_le_bytes().to_vec();
    out.extend_from_slice(&4i16.to_le_bytes());
    out.extend_from_slice(&0f32.to_le_bytes());
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Builder for epoch and marker records
#[derive(Debug, Clone)]
pub struct EventBuilder {
    class: EventClass,
    id: i32,
    name: String,
    state: i32,
    duration: f64,
    timestamp: f64,
    descriptors: Vec<(String, Vec<u8>, String)>,
    active: String,
    reference: String,
    description: String,
}

impl EventBuilder {
    /// Marker record at `timestamp` (POSIX seconds)
    pub fn marker(id: i32, name: &str, description: &str, timestamp: f64) -> Self {
        EventBuilder {
            class: EventClass::Marker,
            id,
            name: name.to_string(),
            state: 0,
            duration: 0.0,
            timestamp,
            descriptors: Vec::new(),
            active: String::new(),
            reference: String::new(),
            description: description.to_string(),
        }
    }

    /// Epoch record at `timestamp` (POSIX seconds)
    pub fn epoch(id: i32, name: &str, timestamp: f64) -> Self {
        EventBuilder {
            class: EventClass::Epoch,
            ..Self::marker(id, name, "", timestamp)
        }
    }

    pub fn state(mut self, state: i32) -> Self {
        self.state = state;
        self
    }

    pub fn duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn channels(mut self, active: &str, reference: &str) -> Self {
        self.active = active.to_string();
        self.reference = reference.to_string();
        self
    }

    /// Adds an epoch descriptor; `value` is an encoded typed value (`value_*`)
    pub fn descriptor(mut self, name: &str, value: Vec<u8>, unit: &str) -> Self {
        self.descriptors.push((name.to_string(), value, unit.to_string()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_class(&mut out, self.class.class_name());

        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&[0xAB; 16]);
        put_class(&mut out, self.class.class_name());
        put_string(&mut out, &self.name);
        put_string(&mut out, &self.name);
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&self.state.to_le_bytes());
        out.push(1);
        out.extend_from_slice(&self.duration.to_le_bytes());
        out.extend_from_slice(&0f64.to_le_bytes());

        let (day, fraction) = posix_to_day(self.timestamp);
        out.extend_from_slice(&day.to_le_bytes());
        out.extend_from_slice(&fraction.to_le_bytes());

        out.extend_from_slice(&(self.descriptors.len() as i32).to_le_bytes());
        for (name, value, unit) in &self.descriptors {
            put_string(&mut out, name);
            out.extend_from_slice(value);
            put_string(&mut out, unit);
        }

        if self.class == EventClass::Marker {
            put_string(&mut out, &self.active);
            put_string(&mut out, &self.reference);
            put_string(&mut out, &self.description);
            out.extend_from_slice(&1i32.to_le_bytes());
            out.push(0);
        }
        out
    }
}

/// Test codec: the stream is plain little-endian `i32`, channel-major per
/// block, and `offset / 8` is the byte position of the block
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainInt32Codec;

impl SampleCodec for PlainInt32Codec {
    fn decode_block(
        &self,
        data: &[u8],
        sample_count: usize,
        channel_count: usize,
        offset: u64,
    ) -> Result<DecodedBlock> {
        let start = (offset / 8) as usize;
        let bytes = sample_count
            .checked_mul(channel_count)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(start))
            .and_then(|end| data.get(start..end))
            .ok_or_else(|| {
                EepError::Codec(format!(
                    "block of {} x {} samples at byte {} outside the stream",
                    sample_count, channel_count, start
                ))
            })?;

        let samples = bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(DecodedBlock { samples, status: 1 })
    }
}

/// Container, event and segment content of a small synthetic recording
#[derive(Debug, Clone)]
pub struct TestRecording {
    pub cnt: Vec<u8>,
    pub evt: Vec<u8>,
    pub seg: Option<String>,
}

/// Creates a 10 s, 100 Hz, two-channel recording starting at `start`
/// with one marker half a second in. Channel `Fp1` counts up from 0,
/// `Cz` counts down from 0; both are stored in reverse order.
pub fn simple_recording(start: f64) -> TestRecording {
    let samples = 1000usize;
    let eeph = eeph_text(100.0, samples as i64, &[
        ("Fp1", 1.0, 0.5, "uV", "ref"),
        ("Cz", 2.0, 0.5, "uV", "A1"),
    ]);

    let mut ep = Vec::new();
    for v in [samples as u64, 0] {
        ep.extend_from_slice(&v.to_le_bytes());
    }
    let chan: Vec<u8> = [1u16, 0].iter().flat_map(|c| c.to_le_bytes()).collect();

    // 存储顺序：Cz在前，Fp1在后
    let mut data = Vec::with_capacity(samples * 8);
    for i in 0..samples as i32 {
        data.extend_from_slice(&(-i).to_le_bytes());
    }
    for i in 0..samples as i32 {
        data.extend_from_slice(&i.to_le_bytes());
    }

    let cnt = riff_file("CNT ", &[
        chunk("eeph", eeph.as_bytes()),
        chunk("info", info_text(start, "Test Subject").as_bytes()),
        list("raw3", &[chunk("ep", &ep), chunk("chan", &chan), chunk("data", &data)]),
    ]);

    let marker = EventBuilder::marker(1, "Trigger", "Stimulus", start + 0.5)
        .state(7)
        .build();

    TestRecording {
        cnt,
        evt: event_file(&[marker]),
        seg: None,
    }
}
