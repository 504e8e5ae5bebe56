//! Integration tests using real recorded data.
//!
//! These tests require the test_data directory to contain sample EVT3 files
//! and are skipped otherwise.
//! Run with: cargo test --test integration_tests

use evcap_core::output::{BinaryWriter, CsvWriter};
use evcap_core::{Evt3Decoder, FieldOrder, Session, SessionConfig, SessionState, SourceTarget};
use std::io::Cursor;
use std::path::Path;

const TEST_FILE: &str = "test_data/laser.raw";

fn test_file() -> Option<&'static Path> {
    let path = Path::new(TEST_FILE);
    if path.exists() {
        Some(path)
    } else {
        eprintln!("Skipping test: test file not found at {}", TEST_FILE);
        None
    }
}

/// Test that the decoder can successfully decode a real EVT3 file.
#[test]
fn test_decode_real_file() {
    let Some(test_path) = test_file() else {
        return;
    };

    let mut decoder = Evt3Decoder::new();
    let result = decoder
        .decode_file(test_path)
        .expect("Failed to decode file");

    // Verify metadata was parsed correctly
    assert_eq!(result.metadata.width, 1280);
    assert_eq!(result.metadata.height, 720);

    // laser.raw has ~116M events
    let cd_count = result.cd_events().count();
    assert!(cd_count > 100_000_000, "Expected >100M events, got {}", cd_count);

    // Timestamps non-decreasing, coordinates inside the sensor
    let mut last_time = 0u64;
    for (i, event) in result.events.iter().enumerate() {
        assert!(
            event.timestamp >= last_time,
            "Timestamp decreased at event {}: {} -> {}",
            i,
            last_time,
            event.timestamp
        );
        last_time = event.timestamp;
        if event.is_cd() {
            assert!(result.metadata.contains(event.x, event.y));
        }
    }
}

/// Test that a session replay yields the same events as a direct decode.
#[test]
fn test_session_matches_decoder() {
    let Some(test_path) = test_file() else {
        return;
    };

    let mut decoder = Evt3Decoder::new();
    let expected = decoder.decode_file(test_path).unwrap();

    let session = Session::new(
        SourceTarget::File(test_path.to_path_buf()),
        SessionConfig::default(),
    );
    session.start().unwrap();
    let mut count = 0usize;
    for event in session.events() {
        assert_eq!(event, expected.events[count], "mismatch at event {}", count);
        count += 1;
    }
    assert_eq!(count, expected.events.len());
    assert!(session.failure().is_none());
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.metadata(), Some(expected.metadata));
}

/// Test different field order outputs.
#[test]
fn test_field_order_formats() {
    let Some(test_path) = test_file() else {
        return;
    };

    let mut decoder = Evt3Decoder::new();
    let result = decoder
        .decode_file(test_path)
        .expect("Failed to decode file");

    // Take first 10 events for comparison
    let events: Vec<_> = result.cd_events().take(10).copied().collect();

    for order in [FieldOrder::XYPT, FieldOrder::TXYP] {
        let mut output = Vec::new();
        {
            let mut writer = CsvWriter::new(&mut output, order);
            writer.write_header(Some(&result.metadata)).unwrap();
            writer.write_events(&events).unwrap();
            writer.flush().unwrap();
        }
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().count(), 11);
        assert_eq!(text.lines().nth(1).unwrap().split(',').count(), 4);
    }
}

/// Test binary output format.
#[test]
fn test_binary_output() {
    let Some(test_path) = test_file() else {
        return;
    };

    let mut decoder = Evt3Decoder::new();
    let result = decoder
        .decode_file(test_path)
        .expect("Failed to decode file");

    let mut writer = BinaryWriter::new(Cursor::new(Vec::new())).unwrap();
    for event in result.cd_events().take(1000) {
        writer.write_event(event).unwrap();
    }
    let data = writer.finish(&result.metadata).unwrap().into_inner();

    assert_eq!(&data[0..8], b"EVT3BIN\0");
    let width = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
    let height = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
    assert_eq!(width, 1280);
    assert_eq!(height, 720);
    let count = u64::from_le_bytes(data[20..28].try_into().unwrap());
    assert_eq!(count, 1000);
}

/// Benchmark-style test to measure throughput.
#[test]
fn test_decode_performance() {
    let Some(test_path) = test_file() else {
        return;
    };

    let start = std::time::Instant::now();

    let mut decoder = Evt3Decoder::new();
    let result = decoder
        .decode_file(test_path)
        .expect("Failed to decode file");

    let duration = start.elapsed();
    let events_per_sec = result.events.len() as f64 / duration.as_secs_f64();

    eprintln!(
        "Performance: decoded {} events in {:.2}s ({:.0} events/s)",
        result.events.len(),
        duration.as_secs_f64(),
        events_per_sec
    );

    // Assert minimum performance threshold (5M events/s)
    assert!(
        events_per_sec > 5_000_000.0,
        "Performance too slow: {:.0} events/s (expected >5M)",
        events_per_sec
    );
}
