use eepread::doctest_utils::*;
use eepread::events::{self, EventClass};
use eepread::{EepError, EventRecord, TypedValue};

const T: f64 = 1_700_000_000.0;

// 辅助函数：解码单个记录的事件文件
fn decode_single(record: Vec<u8>) -> EventRecord {
    let mut records = events::read_events(&event_file(&[record])).unwrap();
    assert_eq!(records.len(), 1);
    records.remove(0)
}

#[test]
fn test_library_header_and_name() {
    let library = events::read_library(&event_file(&[])).unwrap();
    assert_eq!(library.header.timestamp, [2024, 1, 1]);
    assert_eq!(library.header.version, 103);
    assert_eq!(library.name, "Events");
    assert!(library.events.is_empty());
}

#[test]
fn test_marker_fields() {
    let record = EventBuilder::marker(42, "Trigger", "S 12", T + 3.25)
        .state(12)
        .duration(0.5)
        .channels("Cz", "CPz")
        .build();

    match decode_single(record) {
        EventRecord::Marker { event, marker } => {
            assert_eq!(event.id, 42);
            assert_eq!(event.class_name, "class dcEventMarker_c");
            assert_eq!(event.name, "Trigger");
            assert_eq!(event.state, 12);
            assert_eq!(event.duration, 0.5);
            assert_eq!(event.timestamp, T + 3.25);
            assert!(event.descriptors.is_empty());
            assert_eq!(marker.active_channel, "Cz");
            assert_eq!(marker.reference_channel, "CPz");
            assert_eq!(marker.description, "S 12");
            assert_eq!(marker.show_amplitude, 1);
            assert_eq!(marker.show_duration, 0);
        }
        other => panic!("expected a marker, got {:?}", other),
    }
}

#[test]
fn test_epoch_descriptors() {
    let record = EventBuilder::epoch(7, "Epoch Event", T)
        .descriptor("Empty", value_empty(), "")
        .descriptor("Count", value_i32(-3), "n")
        .descriptor("Gain", value_f32(0.25), "")
        .descriptor("Latency", value_f64(12.5), "ms")
        .descriptor("Label", value_unicode("Ωmega"), "")
        .build();

    let decoded = decode_single(record);
    assert_eq!(decoded.description(), "Epoch Event");

    let values: Vec<&TypedValue> = decoded.info().descriptors.iter().map(|d| &d.value).collect();
    assert_eq!(values, [
        &TypedValue::Empty,
        &TypedValue::Int32(-3),
        &TypedValue::Float32(0.25),
        &TypedValue::Float64(12.5),
        &TypedValue::UnicodeString("Ωmega".to_string()),
    ]);
    assert_eq!(decoded.info().descriptors[3].unit, "ms");
}

#[test]
fn test_records_keep_file_order() {
    let records: Vec<Vec<u8>> = (0..10)
        .map(|i| EventBuilder::marker(i, "m", &format!("#{}", i), T + (10 - i) as f64).build())
        .collect();

    let decoded = events::read_events(&event_file(&records)).unwrap();
    let ids: Vec<i32> = decoded.iter().map(|r| r.info().id).collect();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_every_class_name_round_trips() {
    for class in EventClass::ALL {
        assert_eq!(EventClass::from_class_name(class.class_name()), Some(class));
    }
    assert_eq!(EventClass::from_class_name("class dcMystery_c"), None);
}

#[test]
fn test_unknown_class_is_rejected() {
    let evt = event_file(&[unimplemented_record("class dcMystery_c")]);
    assert!(matches!(
        events::read_events(&evt),
        Err(EepError::UnknownEventClass(name)) if name == "class dcMystery_c"
    ));
}

#[test]
fn test_encrypted_file_is_rejected() {
    let mut evt = event_file_header(0, 1);
    evt.extend_from_slice(&event_file(&[])[24..]);
    assert!(matches!(events::read_events(&evt), Err(EepError::Unsupported(_))));
}

#[test]
fn test_truncated_record() {
    let record = EventBuilder::marker(1, "Trigger", "cut", T).build();
    let evt = event_file(&[record]);
    let cut = &evt[..evt.len() - 3];
    assert!(matches!(events::read_events(cut), Err(EepError::TruncatedFile(_))));
}

#[test]
fn test_unsupported_value_type() {
    let mut bad = 11i16.to_le_bytes().to_vec();
    bad.extend_from_slice(&[0u8; 8]);
    let record = EventBuilder::epoch(1, "Epoch Event", T).descriptor("x", bad, "").build();
    assert!(matches!(
        events::read_events(&event_file(&[record])),
        Err(EepError::Unsupported(msg)) if msg.contains("11")
    ));
}
