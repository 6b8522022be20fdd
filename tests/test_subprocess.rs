// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Subprocess backend driven against the yaya_stub helper binary.

use std::collections::BTreeMap;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use libshiori::backend::{frame, HelperRequest, HelperResponse, ModuleBackend, SubprocessBackend, SubprocessConfig};
use libshiori::{BackendConfig, BackendKind, Error, ShioriHost};

const STUB: &str = env!("CARGO_BIN_EXE_yaya_stub");

fn stub() -> SubprocessConfig {
    SubprocessConfig::new(STUB)
}

/// A ghost with `ghost/master/{aya.dic, aya_boot.dic, descript.txt}`.
fn ghost() -> (tempfile::TempDir, PathBuf) {
    let base = tempfile::tempdir().expect("tempdir");
    let master = base.path().join("ghost").join("master");
    std::fs::create_dir_all(&master).expect("mkdir");
    std::fs::write(master.join("aya.dic"), "").expect("dic");
    std::fs::write(master.join("aya_boot.dic"), "").expect("dic");
    std::fs::write(
        master.join("descript.txt"),
        "charset,UTF-8\r\nshiori,yaya.dll\r\nyaya.dic,aya.dic\r\nyaya.dic2,aya_boot.dic\r\n",
    )
    .expect("descript");
    (base, master)
}

fn dics() -> Vec<String> {
    vec!["aya.dic".to_owned(), "aya_boot.dic".to_owned()]
}

fn loaded(config: SubprocessConfig) -> (tempfile::TempDir, SubprocessBackend) {
    let (base, master) = ghost();
    let mut backend = SubprocessBackend::launch(config).expect("launch");
    backend.load(&master, &dics(), "utf-8").expect("load");
    (base, backend)
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).expect("utf8")
}

#[test]
fn load_runs_capability_probe() {
    let (_base, backend) = loaded(stub());
    assert!(backend.is_loaded());
    assert_eq!(backend.kind(), BackendKind::Subprocess);
    let probe = backend.capability().expect("probe ran").as_ref().expect("probe ok");
    assert_eq!(probe.value.as_deref(), Some("yaya_stub"));
}

#[test]
fn rejected_capability_does_not_fail_load() {
    let (_base, backend) = loaded(stub().arg("--no-capability"));
    assert!(backend.is_loaded());
    assert!(backend.capability().expect("probe ran").is_err());
}

#[test]
fn missing_dictionary_is_module_failure() {
    let (_base, master) = ghost();
    let mut backend = SubprocessBackend::launch(stub()).expect("launch");
    let err = backend
        .load(&master, &["missing.dic".to_owned()], "utf-8")
        .expect_err("load should fail");
    match err {
        Error::ModuleReportedFailure { status, error } => {
            assert_eq!(status, 500);
            assert!(error.unwrap_or_default().contains("missing.dic"));
        }
        other => panic!("expected module failure, got {other:?}"),
    }
    assert!(!backend.is_loaded());
    assert!(backend.pid().is_some(), "module failure must not kill the helper");
}

#[test]
fn request_before_load_is_not_loaded() {
    let mut backend = SubprocessBackend::launch(stub()).expect("launch");
    assert!(matches!(
        backend.request("GET", "OnBoot", &BTreeMap::new(), &[]),
        Err(Error::NotLoaded)
    ));
    assert!(matches!(
        backend.request_response(b"GET SHIORI/3.0\r\nID: OnBoot\r\n\r\n"),
        Err(Error::NotLoaded)
    ));
}

#[test]
fn shiori_text_round_trips_through_helper() {
    let (_base, mut backend) = loaded(stub());

    let boot = text(backend.request_response(b"GET SHIORI/3.0\r\nID: OnBoot\r\n\r\n").expect("boot"));
    assert!(boot.starts_with("SHIORI/3.0 200 OK\r\n"));
    assert!(boot.contains("\r\nValue: \\0\\s[0]Hello\\e\r\n"));
    assert!(boot.ends_with("\r\n\r\n"));

    let echo = text(
        backend
            .request_response(b"GET SHIORI/3.0\r\nID: Echo\r\nReference0: a\r\nReference1: b\r\n\r\n")
            .expect("echo"),
    );
    assert!(echo.contains("Value: a,b\r\n"));

    let quiet = text(backend.request_response(b"NOTIFY SHIORI/3.0\r\nID: OnSecondChange\r\n\r\n").expect("notify"));
    assert_eq!(quiet, "SHIORI/3.0 204 No Content\r\n\r\n");
}

#[test]
fn request_without_id_is_bad_request() {
    let (_base, mut backend) = loaded(stub());
    let answer = text(backend.request_response(b"GET SHIORI/3.0\r\nCharset: UTF-8\r\n\r\n").expect("answer"));
    assert_eq!(answer, "SHIORI/3.0 400 Bad Request\r\n\r\n");
    assert!(backend.is_loaded());
}

#[test]
fn module_failure_keeps_helper_running() {
    let (_base, mut backend) = loaded(stub());
    match backend.request("GET", "Fail", &BTreeMap::new(), &[]) {
        Err(Error::ModuleReportedFailure { status, error }) => {
            assert_eq!(status, 500);
            assert_eq!(error.as_deref(), Some("forced failure"));
        }
        other => panic!("expected module failure, got {other:?}"),
    }
    assert!(backend.is_loaded());
    let r = backend.request("GET", "Echo", &BTreeMap::new(), &["still here".to_owned()]).expect("echo");
    assert_eq!(r.value.as_deref(), Some("still here"));
}

#[test]
fn helper_exit_is_transport_failure() {
    let (_base, mut backend) = loaded(stub());
    let err = backend.request("GET", "Crash", &BTreeMap::new(), &[]).expect_err("crash");
    assert!(err.is_transport(), "got {err:?}");
    assert!(!backend.is_loaded());
    assert!(backend.pid().is_none());
    assert!(matches!(
        backend.request("GET", "OnBoot", &BTreeMap::new(), &[]),
        Err(Error::NotLoaded)
    ));
}

#[test]
fn malformed_answer_is_transport_failure() {
    let (_base, mut backend) = loaded(stub());
    let err = backend.request("GET", "Garbage", &BTreeMap::new(), &[]).expect_err("garbage");
    assert!(err.is_transport(), "got {err:?}");
    assert!(!backend.is_loaded());
}

#[test]
fn request_timeout_tears_helper_down() {
    let (_base, mut backend) = loaded(stub().request_timeout(Some(Duration::from_millis(200))));
    let start = Instant::now();
    let err = backend.request("GET", "Hang", &BTreeMap::new(), &[]).expect_err("timeout");
    assert!(err.is_transport(), "got {err:?}");
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(!backend.is_loaded());
}

#[test]
fn message_catalogue_is_sent_before_load() {
    let (_base, master) = ghost();
    std::fs::create_dir(master.join("messagetxt")).expect("mkdir");
    std::fs::write(master.join("messagetxt").join("english.txt"), "").expect("catalogue");

    let mut backend = SubprocessBackend::launch(stub()).expect("launch");
    backend.load(&master, &dics(), "utf-8").expect("load");
    let r = backend.request("GET", "Messages", &BTreeMap::new(), &[]).expect("messages");
    assert_eq!(r.value.as_deref(), Some("english.txt"));
}

#[test]
fn stderr_noise_does_not_block_exchanges() {
    let (_base, mut backend) = loaded(stub());
    for _ in 0..50 {
        let r = backend.request("GET", "Shout", &BTreeMap::new(), &[]).expect("shout");
        assert_eq!(r.status, 204);
    }
}

#[test]
fn undecodable_stderr_does_not_stall_helper() {
    let config = stub()
        .arg("--stderr-flood")
        .request_timeout(Some(Duration::from_secs(20)));
    let (_base, mut backend) = loaded(config);
    assert!(backend.is_loaded());
    let r = backend.request("GET", "Echo", &BTreeMap::new(), &["after flood".to_owned()]).expect("echo");
    assert_eq!(r.value.as_deref(), Some("after flood"));
}

#[test]
fn unload_is_idempotent() {
    let (_base, mut backend) = loaded(stub());
    backend.unload();
    assert!(!backend.is_loaded());
    assert!(backend.pid().is_none());
    backend.unload();
    assert!(matches!(
        backend.request_response(b"GET SHIORI/3.0\r\nID: OnBoot\r\n\r\n"),
        Err(Error::NotLoaded)
    ));
}

#[cfg(unix)]
#[test]
fn unresponsive_helper_is_killed_on_unload() {
    let config = stub()
        .arg("--mute-unload")
        .arg("--ignore-term")
        .unload_timeout(Duration::from_millis(200))
        .shutdown_grace(Duration::from_millis(100));
    let (_base, mut backend) = loaded(config);

    let start = Instant::now();
    backend.unload();
    assert!(backend.pid().is_none());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn back_to_back_requests_answer_in_order() {
    let (_base, master) = ghost();
    let mut child = Command::new(STUB)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn stub");

    let mut batch = Vec::new();
    frame::write_frame(&mut batch, &HelperRequest::load(&master, &dics(), "utf-8")).expect("encode");
    for r in ["first", "second"] {
        let req = HelperRequest::request("GET", "Echo", BTreeMap::new(), vec![r.to_owned()]);
        frame::write_frame(&mut batch, &req).expect("encode");
    }
    let mut stdin = child.stdin.take().expect("stdin");
    stdin.write_all(&batch).expect("write batch");
    stdin.flush().expect("flush");

    let mut out = BufReader::new(child.stdout.take().expect("stdout"));
    let load: HelperResponse = frame::read_frame(&mut out).expect("read").expect("load answer");
    assert!(load.ok);
    assert_eq!(load.loaded_dics.map(|d| d.len()), Some(2));
    let first: HelperResponse = frame::read_frame(&mut out).expect("read").expect("first answer");
    let second: HelperResponse = frame::read_frame(&mut out).expect("read").expect("second answer");
    assert_eq!(first.value.as_deref(), Some("first"));
    assert_eq!(second.value.as_deref(), Some("second"));

    drop(stdin);
    assert!(frame::read_frame::<_, HelperResponse>(&mut out).expect("clean eof").is_none());
    assert!(child.wait().expect("wait").success());
}

#[test]
fn host_session_over_helper() {
    let (_base, backend) = loaded(stub());
    let mut host = ShioriHost::new(Box::new(backend)).with_sender("test");

    assert_eq!(host.event("Echo", &["x", "y"]).expect("echo"), "x,y");
    assert_eq!(host.event::<&str>("Sender", &[]).expect("sender"), "test");
    assert_eq!(host.event::<&str>("Unknown", &[]).expect("no content"), "");
    host.notify::<&str>("OnSecondChange", &[]).expect("notify");
    assert!(matches!(
        host.event::<&str>("Fail", &[]),
        Err(Error::ModuleReportedFailure { status: 500, .. })
    ));
}

#[test]
fn ghost_descript_selects_helper_backend() {
    let (base, _master) = ghost();
    std::env::set_var(libshiori::backend::subprocess::HELPER_ENV, STUB);

    let config = BackendConfig::for_ghost(base.path()).expect("config");
    assert_eq!(config.kind(), BackendKind::Subprocess);
    let BackendConfig::Subprocess { dics: configured, ghost_root, .. } = &config else {
        unreachable!()
    };
    assert_eq!(configured, &dics());
    assert_eq!(ghost_root, &base.path().join("ghost").join("master"));

    let mut host = ShioriHost::load(config).expect("load");
    assert_eq!(host.event::<&str>("OnBoot", &[]).expect("boot"), "\\0\\s[0]Hello\\e");
    host.unload();
    assert!(!host.is_loaded());
}
