//! End-to-end tests driving the server over a real TCP socket, covering the
//! concrete scenarios from the testable-properties list: ping, device and
//! classifier selection, and the training-gate on `application` mode.
//!
//! Each test binds its own fixed port so they can run concurrently; the
//! emulator device and `BoundaryClassifier` keep every scenario here fast
//! enough to run without a live EEG amplifier.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bci_server::{AppConfig, Engine};

fn spawn_server(port: u16) -> Arc<AtomicBool> {
    let mut config = AppConfig::default();
    config.server.bind_addr = "127.0.0.1".to_string();
    config.server.port = port;

    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = shutdown.clone();
    thread::spawn(move || {
        let engine = Engine::new(config);
        let _ = engine.run(thread_shutdown);
    });

    // Give the listener a moment to bind before any test connects.
    thread::sleep(Duration::from_millis(150));
    shutdown
}

fn connect(port: u16) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to test server");
    let reader = BufReader::new(stream.try_clone().expect("clone stream"));
    (stream, reader)
}

fn send_line(stream: &mut TcpStream, line: &str) {
    stream.write_all(format!("{line}\r\n").as_bytes()).expect("write line");
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    line.trim_end_matches(['\r', '\n']).to_string()
}

#[test]
fn ping_replies_pong() {
    let _shutdown = spawn_server(19201);
    let (mut stream, mut reader) = connect(19201);

    send_line(&mut stream, "PING");
    assert_eq!(read_line(&mut reader), "PONG");
}

#[test]
fn device_and_classifier_selection_reaches_idle() {
    let _shutdown = spawn_server(19202);
    let (mut stream, mut reader) = connect(19202);

    send_line(&mut stream, "DEVICE SET emulator");
    send_line(&mut stream, "DEVICE PARAM SET nchannels 8");
    send_line(&mut stream, "DEVICE PARAM SET sample_rate 1000");
    send_line(&mut stream, "CLASSIFIER SET boundary");
    send_line(&mut stream, "CLASSIFIER PARAM SET signal_index 0");
    send_line(&mut stream, "CLASSIFIER PARAM SET bounds -10000 10000");
    send_line(&mut stream, "DEVICE OPEN");

    // The classifier's background thread announces its starting state
    // ("idle") as soon as it is constructed, independent of calibration.
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "idle""#);
}

#[test]
fn application_before_training_is_rejected() {
    let _shutdown = spawn_server(19203);
    let (mut stream, mut reader) = connect(19203);

    send_line(&mut stream, "DEVICE SET emulator");
    send_line(&mut stream, "CLASSIFIER SET boundary");
    send_line(&mut stream, "CLASSIFIER PARAM SET signal_index 0");
    send_line(&mut stream, "CLASSIFIER PARAM SET bounds -10000 10000");
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "idle""#);

    send_line(&mut stream, "MODE SET application");
    let line = read_line(&mut reader);
    assert!(line.starts_with("ERROR "), "expected an ERROR line, got {line:?}");

    send_line(&mut stream, "MODE GET");
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "idle""#);
}

#[test]
fn unknown_device_parameter_is_reported() {
    let _shutdown = spawn_server(19204);
    let (mut stream, mut reader) = connect(19204);

    send_line(&mut stream, "DEVICE SET emulator");
    send_line(&mut stream, "DEVICE PARAM SET not_a_real_parameter 1");
    assert_eq!(read_line(&mut reader), r#"ERROR 303 "Unknown device parameter""#);
}

#[test]
fn commands_before_device_selection_are_rejected() {
    let _shutdown = spawn_server(19205);
    let (mut stream, mut reader) = connect(19205);

    send_line(&mut stream, "DEVICE OPEN");
    assert_eq!(read_line(&mut reader), r#"ERROR 102 "Please specify a recording device first""#);

    send_line(&mut stream, "CLASSIFIER SET boundary");
    assert_eq!(
        read_line(&mut reader),
        r#"ERROR 201 "Please specify a recording device first""#
    );
}

#[test]
fn training_round_trip_unlocks_application_mode() {
    let _shutdown = spawn_server(19206);
    let (mut stream, mut reader) = connect(19206);

    send_line(&mut stream, "DEVICE SET emulator");
    send_line(&mut stream, "DEVICE PARAM SET nchannels 4");
    send_line(&mut stream, "DEVICE PARAM SET sample_rate 1000");
    send_line(&mut stream, "CLASSIFIER SET boundary");
    send_line(&mut stream, "CLASSIFIER PARAM SET signal_index 0");
    send_line(&mut stream, "CLASSIFIER PARAM SET bounds -10000 10000");
    send_line(&mut stream, "DEVICE OPEN");
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "idle""#);

    // `data_collect` blocks on `wait_calibrated` until the recorder has seen
    // `calibration_time_secs` (10s by default) worth of samples since open.
    // Let that elapse up front so the state transition below is immediate.
    thread::sleep(Duration::from_secs(11));

    send_line(&mut stream, "MODE SET data-collect");
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "data-collect""#);

    // Give data-collect a moment to gather a short epoch.
    thread::sleep(Duration::from_millis(300));

    send_line(&mut stream, "MODE SET training");
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "training""#);
    // Training is a no-op reset for the boundary classifier, so it
    // completes on the very next loop iteration and falls back to idle.
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "idle""#);

    send_line(&mut stream, "MODE SET application");
    assert_eq!(read_line(&mut reader), r#"MODE PROVIDE "application""#);
}
