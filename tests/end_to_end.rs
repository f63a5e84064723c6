/* End-to-end command/response exchanges over in-memory transports. */

use at_transceiver::{Error, Feeder, ResponseCode, Transceiver, WriteOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(1);

fn plain(capacity: usize) -> (Transceiver, Feeder) {
    Transceiver::new(capacity, Box::new(|data: &[u8]| Ok(data.len()))).unwrap()
}

/// Transceiver whose write callback loops every sent byte straight back
/// into the receive ring, behaving like a modem with echo enabled.
fn loopback() -> (Transceiver, Arc<Mutex<Option<Feeder>>>) {
    let slot: Arc<Mutex<Option<Feeder>>> = Arc::new(Mutex::new(None));
    let echo = slot.clone();
    let (t, feeder) = Transceiver::new(
        1024,
        Box::new(move |data: &[u8]| {
            if let Some(feeder) = echo.lock().unwrap().as_mut() {
                feeder.feed(data).unwrap();
            }
            Ok(data.len())
        }),
    )
    .unwrap();
    *slot.lock().unwrap() = Some(feeder);
    (t, slot)
}

fn feed(slot: &Arc<Mutex<Option<Feeder>>>, data: &[u8]) {
    slot.lock().unwrap().as_mut().unwrap().feed(data).unwrap();
}

#[test]
fn test_empty_action_exchange() {
    let (t, slot) = loopback();
    let mut guard = t.lock();
    guard.prepare_write(WriteOptions::NO_BUFFER, 0).unwrap();
    guard.write_action("").unwrap();
    // The echoed "AT\r\n" is consumed by the flush.
    guard.flush(TIMEOUT).unwrap();
    assert_eq!(guard.available(), 0);

    feed(&slot, b"\r\nOK\r\n");
    assert_eq!(guard.read_code(TIMEOUT).unwrap(), ResponseCode::Ok);
    assert!(guard.is_start_of_line());
    assert_eq!(guard.available(), 0);
}

#[test]
fn test_set_command_with_echo_consumption() {
    let (t, slot) = loopback();
    let mut guard = t.lock();
    guard.prepare_write(WriteOptions::empty(), 64).unwrap();
    guard.write_set("+COPS").unwrap();
    guard.write_i32(1, 10).unwrap();
    guard.write_i32(0, 10).unwrap();
    guard.write_string("T-Mobile").unwrap();
    guard.write_i32(2, 10).unwrap();
    assert_eq!(guard.tx_buffer(), b"AT+COPS=1,0,\"T-Mobile\",2");

    // The buffered line travels out, is echoed back and skipped.
    guard.flush(TIMEOUT).unwrap();
    assert_eq!(guard.available(), 0);

    feed(&slot, b"\r\nOK\r\n");
    assert_eq!(guard.read_code(TIMEOUT).unwrap(), ResponseCode::Ok);
}

#[test]
fn test_urc_listener_waits_for_command_exchange() {
    let (t, mut feeder) = plain(1024);

    // Task A starts its exchange before the listener shows up.
    let mut guard = t.lock();

    let listener = {
        let t = t.clone();
        thread::spawn(move || {
            let mut guard = t.lock();
            guard.read_command("CREG", TIMEOUT).unwrap();
            let a = guard.read_i32(10, TIMEOUT).unwrap();
            let b = guard.read_i32(10, TIMEOUT).unwrap();
            (a, b)
        })
    };
    // Give the listener time to block on the lock.
    thread::sleep(Duration::from_millis(50));

    feeder
        .feed(b"\r\n+CSQ: 21,99\r\n\r\nOK\r\n\r\n+CREG: 1,2\r\n")
        .unwrap();

    guard.read_command("CSQ", TIMEOUT).unwrap();
    assert_eq!(guard.read_i32(10, TIMEOUT).unwrap(), 21);
    assert_eq!(guard.read_i32(10, TIMEOUT).unwrap(), 99);
    assert_eq!(guard.read_code(TIMEOUT).unwrap(), ResponseCode::Ok);
    drop(guard);

    assert_eq!(listener.join().unwrap(), (1, 2));
}

#[test]
fn test_hex_argument() {
    let (t, mut feeder) = plain(1024);
    feeder.feed(b"\r\n+IPD: \"48656C6C6F\"\r\nOK\r\n").unwrap();

    let mut guard = t.lock();
    guard.read_command("IPD", TIMEOUT).unwrap();
    let bytes = guard.read_hex_string(10, TIMEOUT).unwrap();
    assert_eq!(bytes, b"Hello".to_vec());
}

#[test]
fn test_truncated_command_keeps_stream_aligned() {
    let (t, mut feeder) = plain(1024);
    feeder.feed(b"\r\n+VERYLONGNAME: 1\r\n").unwrap();

    let mut guard = t.lock();
    match guard.read_command_any(4, TIMEOUT) {
        Err(Error::Truncated { partial }) => assert_eq!(partial, b"VERY"),
        other => panic!("expected truncation, got {:?}", other),
    }
    assert_eq!(guard.read_i32(10, TIMEOUT).unwrap(), 1);
    assert!(guard.is_start_of_line());
}

#[test]
fn test_i32_loopback_round_trip() {
    let (t, _slot) = loopback();
    let mut guard = t.lock();
    for x in [0, 1, -1, 42, -70_000, i32::MAX, i32::MIN] {
        guard
            .prepare_write(WriteOptions::NO_STATE | WriteOptions::NO_ECHO, 64)
            .unwrap();
        guard.write_i32(x, 10).unwrap();
        guard.flush(TIMEOUT).unwrap();
        assert_eq!(guard.read_i32(10, TIMEOUT).unwrap(), x);
    }
}

#[test]
fn test_hex_string_loopback_round_trip() {
    let (t, _slot) = loopback();
    let mut guard = t.lock();
    for payload in [&[0u8, 0xFF, 0x7E][..], b"Hello", &[0xDE, 0xAD, 0xBE, 0xEF]] {
        guard
            .prepare_write(WriteOptions::NO_STATE | WriteOptions::NO_ECHO, 64)
            .unwrap();
        guard.write_hex_string(payload).unwrap();
        guard.flush(TIMEOUT).unwrap();
        let decoded = guard.read_hex_string(payload.len(), TIMEOUT).unwrap();
        assert_eq!(decoded, payload);
    }
}

#[test]
fn test_concurrent_feed_and_read_preserves_bytes() {
    // Small ring so the producer keeps hitting the capacity limit.
    let (t, mut feeder) = plain(32);
    let payload: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    let expected = payload.clone();

    let producer = thread::spawn(move || {
        let mut rest = &payload[..];
        while !rest.is_empty() {
            match feeder.feed(rest) {
                Ok(n) => rest = &rest[n..],
                Err(Error::OutOfResources { actual }) => {
                    rest = &rest[actual..];
                    thread::sleep(Duration::from_micros(100));
                }
                Err(e) => panic!("feed failed: {}", e),
            }
        }
    });

    let mut guard = t.lock();
    let mut out = vec![0u8; 4096];
    guard.read(&mut out, Duration::from_secs(10)).unwrap();
    assert_eq!(out, expected);
    producer.join().unwrap();
}

#[test]
fn test_ring_at_capacity_reports_overflow_then_drains() {
    let (t, mut feeder) = plain(8);
    feeder.feed(b"12345678").unwrap();
    match feeder.feed(b"9") {
        Err(Error::OutOfResources { actual }) => assert_eq!(actual, 0),
        other => panic!("expected overflow, got {:?}", other.map(|_| ())),
    }

    let mut guard = t.lock();
    let mut buf = [0u8; 8];
    assert_eq!(guard.read(&mut buf, TIMEOUT).unwrap(), 8);
    assert_eq!(&buf, b"12345678");
    drop(guard);
    feeder.feed(b"9").unwrap();
}

#[test]
fn test_lock_is_mutually_exclusive() {
    let (t, _feeder) = plain(16);
    let busy = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let t = t.clone();
        let busy = busy.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                let _guard = t.lock();
                assert!(!busy.swap(true, Ordering::SeqCst));
                thread::sleep(Duration::from_micros(50));
                busy.store(false, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
