//! Decoder for the binary `.evt` sidecar (event library).
//!
//! The stream is a serialized class hierarchy: every object starts with a
//! class tag, optionally followed by its class name, and the class name
//! selects how the rest of the record is laid out. Only uncompressed,
//! unencrypted libraries are supported.
//!
//! Epoch and marker records are decoded in full. Artefact, spike, seizure,
//! sleep and R-peak records are recognised, but their layout is not known,
//! so meeting one aborts the whole decode with
//! [`EepError::NotImplementedEventClass`].
//!
//! ```rust
//! use eepread::events;
//! use eepread::doctest_utils::{event_file, value_i32, EventBuilder};
//!
//! let marker = EventBuilder::marker(1, "Trigger", "Stimulus", 1_600_000_000.0)
//!     .descriptor("Code", value_i32(5), "")
//!     .build();
//! let bytes = event_file(&[marker]);
//!
//! let records = events::read_events(&bytes)?;
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].description(), "Stimulus");
//! # Ok::<(), eepread::EepError>(())
//! ```

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::error::{EepError, Result};
use crate::types::{EpochDescriptor, EventInfo, EventRecord, MarkerInfo, TypedValue};
use crate::utils::day_to_posix;
use crate::{EEP_LIBRARY_CLASS, EEP_MAX_STRING_LEN};

/// 数组类型标志位
const ARRAY_FLAG: u16 = 1 << 9;
const ARRAY_FLAGS_EXT: u16 = (1 << 13) | (1 << 14);

/// Event classes known to the library format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Epoch,
    Marker,
    Artefact,
    Spike,
    Seizure,
    Sleep,
    RPeak,
}

impl EventClass {
    pub const ALL: [EventClass; 7] = [
        EventClass::Epoch,
        EventClass::Marker,
        EventClass::Artefact,
        EventClass::Spike,
        EventClass::Seizure,
        EventClass::Sleep,
        EventClass::RPeak,
    ];

    /// Serialized class name
    pub fn class_name(self) -> &'static str {
        match self {
            EventClass::Epoch => "class dcEpochEvent_c",
            EventClass::Marker => "class dcEventMarker_c",
            EventClass::Artefact => "class dcArtefactEvent_c",
            EventClass::Spike => "class dcSpikeEvent_c",
            EventClass::Seizure => "class dcSeizureEvent_c",
            EventClass::Sleep => "class dcSleepEvent_c",
            EventClass::RPeak => "class dcRPeakEvent_c",
        }
    }

    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.class_name() == name)
    }

    pub fn is_implemented(self) -> bool {
        matches!(self, EventClass::Epoch | EventClass::Marker)
    }
}

/// Fixed-size preamble of an event file
#[derive(Debug, Clone, PartialEq)]
pub struct EventFileHeader {
    pub timestamp: [u32; 3],
    pub version: i32,
    pub compress: i32,
    pub encrypt: i32,
}

/// A fully decoded event library
#[derive(Debug, Clone, PartialEq)]
pub struct EventLibrary {
    pub header: EventFileHeader,
    pub name: String,
    pub events: Vec<EventRecord>,
}

/// Decodes an event file and returns its records in stored order
pub fn read_events(bytes: &[u8]) -> Result<Vec<EventRecord>> {
    Ok(read_library(bytes)?.events)
}

/// Decodes an event file, keeping the file header and library name
pub fn read_library(bytes: &[u8]) -> Result<EventLibrary> {
    let mut stream = EventStream::new(bytes);

    let header = stream.read_file_header()?;
    if header.compress != 0 {
        return Err(EepError::Unsupported("compressed event files".to_string()));
    }
    if header.encrypt != 0 {
        return Err(EepError::Unsupported("encrypted event files".to_string()));
    }

    match stream.read_class()? {
        Some(name) if name == EEP_LIBRARY_CLASS => {}
        other => {
            return Err(EepError::BadFile(format!(
                "expected '{}', found '{}'",
                EEP_LIBRARY_CLASS,
                other.unwrap_or_default()
            )))
        }
    }

    let name = stream.read_string()?;
    let count = stream.u32("record count")?;

    let mut events = Vec::new();
    for _ in 0..count {
        events.push(stream.read_record()?);
    }

    debug!(library = %name, events = events.len(), version = header.version, "decoded event library");
    Ok(EventLibrary { header, name, events })
}

/// Decodes a single typed value (type tag followed by its payload)
pub fn read_typed_value(bytes: &[u8]) -> Result<TypedValue> {
    EventStream::new(bytes).read_value()
}

/// 顺序读取事件流的游标
struct EventStream<'a> {
    cursor: Cursor<&'a [u8]>,
}

/// 将流末尾的IO错误转换为截断错误
fn eof(what: &'static str) -> impl FnOnce(io::Error) -> EepError {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            EepError::TruncatedFile(format!("event stream ended while reading {}", what))
        }
        _ => EepError::Io(e),
    }
}

impl<'a> EventStream<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        EventStream {
            cursor: Cursor::new(bytes),
        }
    }

    fn remaining(&self) -> u64 {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position())
    }

    fn i8(&mut self, what: &'static str) -> Result<i8> {
        self.cursor.read_i8().map_err(eof(what))
    }

    fn u8(&mut self, what: &'static str) -> Result<u8> {
        self.cursor.read_u8().map_err(eof(what))
    }

    fn i16(&mut self, what: &'static str) -> Result<i16> {
        self.cursor.read_i16::<LittleEndian>().map_err(eof(what))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32> {
        self.cursor.read_i32::<LittleEndian>().map_err(eof(what))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(eof(what))
    }

    fn f32(&mut self, what: &'static str) -> Result<f32> {
        self.cursor.read_f32::<LittleEndian>().map_err(eof(what))
    }

    fn f64(&mut self, what: &'static str) -> Result<f64> {
        self.cursor.read_f64::<LittleEndian>().map_err(eof(what))
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<Vec<u8>> {
        if (len as u64) > self.remaining() {
            return Err(eof(what)(io::ErrorKind::UnexpectedEof.into()));
        }
        let mut buf = vec![0u8; len];
        self.cursor.read_exact(&mut buf).map_err(eof(what))?;
        Ok(buf)
    }

    fn read_file_header(&mut self) -> Result<EventFileHeader> {
        let timestamp = [
            self.u32("file timestamp")?,
            self.u32("file timestamp")?,
            self.u32("file timestamp")?,
        ];
        Ok(EventFileHeader {
            timestamp,
            version: self.i32("file version")?,
            compress: self.i32("compress flag")?,
            encrypt: self.i32("encrypt flag")?,
        })
    }

    /// 类标签：0表示无类名，-1表示后跟类名
    fn read_class(&mut self) -> Result<Option<String>> {
        match self.i32("class tag")? {
            0 => Ok(None),
            -1 => Ok(Some(self.read_string()?)),
            tag => Err(EepError::BadClass(tag)),
        }
    }

    /// 单字节长度前缀的字符串
    fn read_string(&mut self) -> Result<String> {
        let len = self.u8("string length")? as usize;
        if len >= EEP_MAX_STRING_LEN {
            return Err(EepError::StringTooLong(len));
        }
        let raw = self.bytes(len, "string")?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// int32字节数前缀的UTF-16字符串
    fn read_unicode(&mut self) -> Result<String> {
        let len = self.i32("unicode length")?;
        if len < 0 {
            return Err(EepError::InvalidFormat(format!("negative unicode length {}", len)));
        }
        let len = len as usize;
        if len >= EEP_MAX_STRING_LEN {
            return Err(EepError::StringTooLong(len));
        }
        if len % 2 != 0 {
            return Err(EepError::InvalidFormat(format!("odd UTF-16 byte count {}", len)));
        }

        let raw = self.bytes(len, "unicode string")?;
        Ok(decode_utf16(&raw))
    }

    fn read_record(&mut self) -> Result<EventRecord> {
        let class_name = self.read_class()?.unwrap_or_default();
        let class = EventClass::from_class_name(&class_name)
            .ok_or_else(|| EepError::UnknownEventClass(class_name.clone()))?;

        match class {
            EventClass::Epoch => {
                let event = self.read_event()?;
                Ok(EventRecord::Epoch(event))
            }
            EventClass::Marker => {
                let event = self.read_event()?;
                let marker = self.read_marker_tail()?;
                Ok(EventRecord::Marker { event, marker })
            }
            EventClass::Artefact
            | EventClass::Spike
            | EventClass::Seizure
            | EventClass::Sleep
            | EventClass::RPeak => Err(EepError::NotImplementedEventClass(class_name)),
        }
    }

    /// 所有事件类共有的字段
    fn read_event(&mut self) -> Result<EventInfo> {
        let id = self.i32("event id")?;

        // GUID，丢弃
        self.bytes(16, "event guid")?;

        let class_name = self.read_class()?.unwrap_or_default();
        let name = self.read_string()?;
        let display_name = self.read_string()?;
        let event_type = self.i32("event type")?;
        let state = self.i32("event state")?;
        let original = self.i8("original flag")?;
        let duration = self.f64("event duration")?;
        let offset = self.f64("event offset")?;

        let date = self.f64("event date")?;
        let fraction = self.f64("event fraction")?;
        let timestamp = day_to_posix(date, fraction);

        let descriptors = self.read_descriptors()?;

        Ok(EventInfo {
            id,
            class_name,
            name,
            display_name,
            event_type,
            state,
            original,
            duration,
            offset,
            timestamp,
            descriptors,
        })
    }

    fn read_descriptors(&mut self) -> Result<Vec<EpochDescriptor>> {
        let count = self.i32("descriptor count")?;
        if count < 0 {
            return Err(EepError::InvalidFormat(format!("negative descriptor count {}", count)));
        }

        let mut descriptors = Vec::new();
        for _ in 0..count {
            let name = self.read_string()?;
            let value = self.read_value()?;
            let unit = self.read_string()?;
            descriptors.push(EpochDescriptor { name, value, unit });
        }
        Ok(descriptors)
    }

    fn read_marker_tail(&mut self) -> Result<MarkerInfo> {
        let active_channel = self.read_string()?;
        let reference_channel = self.read_string()?;
        let description = self.read_string()?;
        let show_amplitude = self.i32("show amplitude flag")?;
        let show_duration = self.i8("show duration flag")?;

        Ok(MarkerInfo {
            active_channel,
            reference_channel,
            description,
            show_amplitude,
            show_duration,
        })
    }

    fn read_value(&mut self) -> Result<TypedValue> {
        let tag = self.i16("data type")?;

        match tag {
            0 | 1 | 1024 => Ok(TypedValue::Empty),
            2 => Ok(TypedValue::Int16(self.i16("int16 value")?)),
            3 => Ok(TypedValue::Int32(self.i32("int32 value")?)),
            4 => Ok(TypedValue::Float32(self.f32("float32 value")?)),
            5 => Ok(TypedValue::Float64(self.f64("float64 value")?)),
            8 => Ok(TypedValue::UnicodeString(self.read_unicode()?)),
            t if (t as u16) & (ARRAY_FLAG | ARRAY_FLAGS_EXT) != 0 => self.read_array(),
            t => Err(EepError::Unsupported(format!("data type tag {}", t))),
        }
    }

    fn read_array(&mut self) -> Result<TypedValue> {
        let element = self.i16("array element type")?;
        if element != 4 {
            return Err(EepError::Unsupported(format!("array element type {}", element)));
        }

        // 占位元素，丢弃
        self.f32("array placeholder")?;

        let count = self.u32("array length")? as u64;
        if count * 4 > self.remaining() {
            return Err(EepError::TruncatedFile(format!(
                "float array of {} elements exceeds the event stream",
                count
            )));
        }

        let mut values = vec![0f32; count as usize];
        self.cursor
            .read_f32_into::<LittleEndian>(&mut values)
            .map_err(eof("float array"))?;
        Ok(TypedValue::Float32Array(values))
    }
}

/// 解码UTF-16，识别字节序标记，默认小端
fn decode_utf16(raw: &[u8]) -> String {
    let mut big_endian = false;
    let mut body = raw;

    if raw.len() >= 2 {
        match (raw[0], raw[1]) {
            (0xFF, 0xFE) => body = &raw[2..],
            (0xFE, 0xFF) => {
                big_endian = true;
                body = &raw[2..];
            }
            _ => {}
        }
    }

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|p| {
            if big_endian {
                u16::from_be_bytes([p[0], p[1]])
            } else {
                u16::from_le_bytes([p[0], p[1]])
            }
        })
        .collect();

    String::from_utf16_lossy(&units)
}
