// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SHIORI over a helper process (yaya_core): JSON lines on stdin/stdout,
// diagnostics on stderr.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame;
use super::{BackendKind, ModuleBackend};
use crate::proto::{reason_phrase, ShioriRequest, PROTOCOL};
use crate::{process, Error, Result};

/// Environment variable naming the helper executable.
pub const HELPER_ENV: &str = "SHIORI_YAYA_CORE";

/// Helper file name searched next to the host and on `PATH`.
pub const HELPER_NAME: &str = "yaya_core";

/// Message catalogues tried under `<ghost_root>/messagetxt`, first hit wins.
pub const MESSAGE_FILES: &[&str] = &[
    "japanese.txt",
    "english.txt",
    "simplified-chinese.txt",
    "traditional-chinese.txt",
    "classical-chinese.txt",
];

const STDERR_TARGET: &str = "libshiori::helper";

// ---------------------------------------------------------------------------
// Wire envelopes
// ---------------------------------------------------------------------------

/// Host → helper envelope. Only `cmd` is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghost_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dic: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_path: Option<String>,
}

impl HelperRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_owned(),
            ..Self::default()
        }
    }

    pub fn load(ghost_root: &Path, dics: &[String], encoding: &str) -> Self {
        Self {
            ghost_root: Some(ghost_root.to_string_lossy().into_owned()),
            dic: Some(dics.to_vec()),
            encoding: Some(encoding.to_owned()),
            env: Some(BTreeMap::from([("LANG".to_owned(), "ja_JP.UTF-8".to_owned())])),
            headers: Some(BTreeMap::from([("Charset".to_owned(), "UTF-8".to_owned())])),
            ..Self::command("load")
        }
    }

    pub fn load_messages(path: &Path) -> Self {
        Self {
            message_path: Some(path.to_string_lossy().into_owned()),
            ..Self::command("load_messages")
        }
    }

    pub fn request(method: &str, id: &str, headers: BTreeMap<String, String>, refs: Vec<String>) -> Self {
        Self {
            method: Some(method.to_owned()),
            id: Some(id.to_owned()),
            headers: Some(headers),
            refs: Some(refs),
            ..Self::command("request")
        }
    }
}

/// Helper → host envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperResponse {
    pub ok: bool,
    #[serde(default)]
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_dics: Option<Vec<String>>,
}

impl HelperResponse {
    pub fn success(status: i32, value: Option<String>) -> Self {
        Self {
            ok: true,
            status,
            value,
            ..Self::default()
        }
    }

    pub fn failure(status: i32, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn into_result(self) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(Error::ModuleReportedFailure {
                status: self.status,
                error: self.error,
            })
        }
    }
}

/// Render a helper answer as SHIORI/3.0 text: status line with reason
/// phrase, the helper's headers, `Value` when present, blank line.
pub fn render_response(response: &HelperResponse) -> String {
    let status = if response.status == 0 { 200 } else { response.status };
    let reason = u16::try_from(status).map(reason_phrase).unwrap_or("OK");
    let mut out = format!("{PROTOCOL} {status} {reason}\r\n");
    for (key, value) in response.headers.iter().flatten() {
        out.push_str(&format!("{key}: {value}\r\n"));
    }
    if let Some(value) = &response.value {
        out.push_str(&format!("Value: {value}\r\n"));
    }
    out.push_str("\r\n");
    out
}

/// Local answer for a request the helper cannot route.
pub fn bad_request() -> String {
    format!("{PROTOCOL} 400 {}\r\n\r\n", reason_phrase(400))
}

// ---------------------------------------------------------------------------
// SubprocessConfig
// ---------------------------------------------------------------------------

/// How to launch and talk to the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessConfig {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    /// Bound on each request/response exchange. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Bound on the farewell `unload` exchange.
    pub unload_timeout: Duration,
    /// Time between SIGTERM and SIGKILL at shutdown.
    pub shutdown_grace: Duration,
}

impl SubprocessConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            request_timeout: None,
            unload_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_millis(300),
        }
    }

    /// Find the helper: `$SHIORI_YAYA_CORE`, then next to the running
    /// executable, then `PATH`.
    pub fn locate() -> Result<Self> {
        if let Some(path) = std::env::var_os(HELPER_ENV).filter(|p| !p.is_empty()) {
            return Ok(Self::new(path));
        }

        let file_name = format!("{HELPER_NAME}{}", std::env::consts::EXE_SUFFIX);
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)));
        let on_path = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).map(|dir| dir.join(&file_name)).collect::<Vec<_>>())
            .unwrap_or_default();

        beside_exe
            .into_iter()
            .chain(on_path)
            .find(|p| p.is_file())
            .map(Self::new)
            .ok_or_else(|| Error::LoadFailed(format!("{HELPER_NAME} helper not found; set {HELPER_ENV}")))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn unload_timeout(mut self, timeout: Duration) -> Self {
        self.unload_timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

// ---------------------------------------------------------------------------
// SubprocessBackend
// ---------------------------------------------------------------------------

type Line = Result<Option<Vec<u8>>>;

struct Helper {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<Line>,
    _stdout: JoinHandle<()>,
    _stderr: JoinHandle<()>,
}

/// A SHIORI module hosted by a helper process.
///
/// Exchanges are strictly one request, one response. A transport failure
/// (closed pipe, malformed or cut-off line, timeout) tears the helper down;
/// launch a new backend to recover.
pub struct SubprocessBackend {
    config: SubprocessConfig,
    helper: Option<Helper>,
    loaded: bool,
    capability: Option<std::result::Result<HelperResponse, String>>,
}

impl SubprocessBackend {
    /// Spawn the helper with piped stdio and start the stdout/stderr readers.
    pub fn launch(config: SubprocessConfig) -> Result<Self> {
        let mut child = Command::new(&config.executable)
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::LoadFailed(format!("launch {}: {e}", config.executable.display())))?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            abandon(&mut child);
            return Err(Error::LoadFailed("helper stdio was not captured".to_owned()));
        };

        let (tx, lines) = mpsc::channel::<Line>();
        let stdout = thread::Builder::new()
            .name("shiori-helper-out".to_owned())
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    let line = frame::read_line(&mut reader);
                    let done = !matches!(line, Ok(Some(_)));
                    if tx.send(line).is_err() || done {
                        break;
                    }
                }
            });
        let stdout = match stdout {
            Ok(handle) => handle,
            Err(e) => {
                abandon(&mut child);
                return Err(Error::system("spawn helper stdout reader", e));
            }
        };
        let stderr = match thread::Builder::new()
            .name("shiori-helper-err".to_owned())
            .spawn(move || drain_stderr(stderr))
        {
            Ok(handle) => handle,
            Err(e) => {
                abandon(&mut child);
                return Err(Error::system("spawn helper stderr reader", e));
            }
        };

        tracing::info!(
            executable = %config.executable.display(),
            pid = child.id(),
            "helper launched"
        );
        Ok(Self {
            config,
            helper: Some(Helper {
                child,
                stdin,
                lines,
                _stdout: stdout,
                _stderr: stderr,
            }),
            loaded: false,
            capability: None,
        })
    }

    pub fn config(&self) -> &SubprocessConfig {
        &self.config
    }

    /// Process id of the running helper.
    pub fn pid(&self) -> Option<u32> {
        self.helper.as_ref().map(|h| h.child.id())
    }

    /// Outcome of the capability probe issued by the last successful
    /// [`load`](Self::load). `None` before any load.
    pub fn capability(&self) -> Option<&std::result::Result<HelperResponse, String>> {
        self.capability.as_ref()
    }

    /// Load the ghost's dictionaries, then probe `GET capability`.
    ///
    /// A message catalogue from `<ghost_root>/messagetxt` is sent first when
    /// one exists; its rejection is logged only. A rejected probe is logged
    /// and recorded but does not fail the load.
    pub fn load(&mut self, ghost_root: &Path, dics: &[String], encoding: &str) -> Result<()> {
        tracing::debug!(ghost_root = %ghost_root.display(), dics = dics.len(), encoding, "helper load");

        if let Some(path) = find_message_file(ghost_root) {
            match self.exchange(&HelperRequest::load_messages(&path), self.config.request_timeout) {
                Ok(r) if r.ok => tracing::debug!(path = %path.display(), "message catalogue loaded"),
                Ok(r) => tracing::warn!(path = %path.display(), error = ?r.error, "message catalogue rejected"),
                Err(e) => return Err(e),
            }
        }

        let response = self
            .exchange(&HelperRequest::load(ghost_root, dics, encoding), self.config.request_timeout)?
            .into_result()?;
        for (i, dic) in response.loaded_dics.iter().flatten().enumerate() {
            let name = Path::new(dic).file_name().map_or_else(|| dic.clone(), |n| n.to_string_lossy().into_owned());
            tracing::debug!(index = i + 1, dic = %name, "dictionary loaded");
        }
        self.loaded = true;

        match self.request("GET", "capability", &BTreeMap::new(), &[]) {
            Ok(r) => self.capability = Some(Ok(r)),
            Err(e) if e.is_transport() => {
                self.capability = Some(Err(e.to_string()));
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "capability handshake failed");
                self.capability = Some(Err(e.to_string()));
            }
        }
        tracing::info!(ghost_root = %ghost_root.display(), "helper module loaded");
        Ok(())
    }

    /// One SHIORI exchange. `ok: false` answers surface as
    /// [`Error::ModuleReportedFailure`].
    pub fn request(
        &mut self,
        method: &str,
        id: &str,
        headers: &BTreeMap<String, String>,
        refs: &[String],
    ) -> Result<HelperResponse> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }
        let req = HelperRequest::request(method, id, headers.clone(), refs.to_vec());
        self.exchange(&req, self.config.request_timeout)?.into_result()
    }

    fn exchange(&mut self, req: &HelperRequest, timeout: Option<Duration>) -> Result<HelperResponse> {
        let helper = self.helper.as_mut().ok_or(Error::NotLoaded)?;
        tracing::debug!(cmd = %req.cmd, id = ?req.id, "helper exchange");

        let result = frame::write_frame(&mut helper.stdin, req).and_then(|()| {
            let line = match timeout {
                None => helper
                    .lines
                    .recv()
                    .map_err(|_| Error::transport("helper output reader stopped"))?,
                Some(t) => match helper.lines.recv_timeout(t) {
                    Ok(line) => line,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(Error::transport(format!("no answer to `{}` within {t:?}", req.cmd)))
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(Error::transport("helper output reader stopped"))
                    }
                },
            };
            match line? {
                Some(bytes) => frame::decode::<HelperResponse>(&bytes),
                None => Err(Error::transport("helper closed its output")),
            }
        });

        if let Err(e) = &result {
            if e.is_transport() {
                tracing::warn!(cmd = %req.cmd, error = %e, "helper transport failed, tearing down");
                self.terminate();
            }
        }
        result
    }

    fn terminate(&mut self) {
        self.loaded = false;
        let Some(helper) = self.helper.take() else {
            return;
        };
        let Helper { mut child, stdin, .. } = helper;
        drop(stdin);
        let r = process::shutdown(&mut child, self.config.shutdown_grace);
        tracing::info!(pid = child.id(), exit_code = ?r.exit_code, signal = ?r.signal, killed = r.killed, "helper stopped");
    }
}

impl ModuleBackend for SubprocessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    fn is_loaded(&self) -> bool {
        self.loaded && self.helper.is_some()
    }

    /// Parse SHIORI text, forward it as a `request` envelope and render the
    /// answer back to SHIORI text. Requests without an `ID` get `400`.
    fn request_response(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if !self.is_loaded() {
            return Err(Error::NotLoaded);
        }
        let parsed = ShioriRequest::parse_bytes(request);
        let Some(id) = parsed.id.clone() else {
            return Ok(bad_request().into_bytes());
        };
        let method = parsed.method.as_deref().unwrap_or("GET");
        let refs = parsed.references();
        let headers: BTreeMap<String, String> = parsed.headers.into_iter().collect();
        let response = self.request(method, &id, &headers, &refs)?;
        Ok(render_response(&response).into_bytes())
    }

    /// Best-effort `unload` exchange, then stop the helper regardless.
    fn unload(&mut self) {
        if self.helper.is_none() {
            return;
        }
        if self.loaded {
            if let Err(e) = self.exchange(&HelperRequest::command("unload"), Some(self.config.unload_timeout)) {
                tracing::debug!(error = %e, "unload exchange failed");
            }
        }
        self.terminate();
    }
}

impl Drop for SubprocessBackend {
    fn drop(&mut self) {
        self.unload();
    }
}

fn find_message_file(ghost_root: &Path) -> Option<PathBuf> {
    let dir = ghost_root.join("messagetxt");
    MESSAGE_FILES.iter().map(|name| dir.join(name)).find(|p| p.is_file())
}

/// Kill and reap a helper that never became usable.
fn abandon(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Decode one stderr line: UTF-8 when valid, Shift_JIS otherwise.
fn decode_diagnostic(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => encoding_rs::SHIFT_JIS.decode_without_bom_handling(bytes).0,
    }
}

/// Forward helper stderr to tracing, line by line, until the pipe closes.
///
/// Lines are read as raw bytes; undecodable output never stops the drain.
fn drain_stderr(stderr: impl Read) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(target: STDERR_TARGET, error = %e, "helper stderr closed");
                break;
            }
        }
        let text = decode_diagnostic(&buf);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.contains("error") || lower.contains("failed") {
            tracing::warn!(target: STDERR_TARGET, "{line}");
        } else {
            tracing::debug!(target: STDERR_TARGET, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_omits_absent_fields() {
        let req = HelperRequest::request("GET", "OnBoot", BTreeMap::new(), vec!["a".into()]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"cmd": "request", "method": "GET", "id": "OnBoot", "headers": {}, "ref": ["a"]})
        );
        assert_eq!(serde_json::to_value(HelperRequest::command("unload")).unwrap(), json!({"cmd": "unload"}));
    }

    #[test]
    fn load_envelope_carries_locale_and_charset() {
        let req = HelperRequest::load(Path::new("/g/ghost/master"), &["aya.dic".into()], "utf-8");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["cmd"], "load");
        assert_eq!(value["ghost_root"], "/g/ghost/master");
        assert_eq!(value["dic"], json!(["aya.dic"]));
        assert_eq!(value["env"]["LANG"], "ja_JP.UTF-8");
        assert_eq!(value["headers"]["Charset"], "UTF-8");
    }

    #[test]
    fn response_envelope_tolerates_missing_optionals() {
        let r: HelperResponse = serde_json::from_str(r#"{"ok":true,"status":204}"#).unwrap();
        assert_eq!(r, HelperResponse::success(204, None));
        let r: HelperResponse =
            serde_json::from_str(r#"{"ok":true,"status":200,"loaded_dics":["/a/b.dic"],"extra":1}"#).unwrap();
        assert_eq!(r.loaded_dics, Some(vec!["/a/b.dic".to_owned()]));
    }

    #[test]
    fn render_uses_reason_phrases() {
        let text = render_response(&HelperResponse::success(200, Some("\\0hi\\e".into())));
        assert_eq!(text, "SHIORI/3.0 200 OK\r\nValue: \\0hi\\e\r\n\r\n");

        let text = render_response(&HelperResponse::success(204, None));
        assert_eq!(text, "SHIORI/3.0 204 No Content\r\n\r\n");

        let mut with_headers = HelperResponse::success(200, Some("v".into()));
        with_headers.headers = Some(BTreeMap::from([("Charset".into(), "UTF-8".into())]));
        assert_eq!(
            render_response(&with_headers),
            "SHIORI/3.0 200 OK\r\nCharset: UTF-8\r\nValue: v\r\n\r\n"
        );
    }

    #[test]
    fn rejected_answer_maps_to_module_failure() {
        let err = HelperResponse::failure(500, "boom").into_result().unwrap_err();
        match err {
            Error::ModuleReportedFailure { status, error } => {
                assert_eq!(status, 500);
                assert_eq!(error.as_deref(), Some("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn diagnostics_decode_utf8_then_shift_jis() {
        assert_eq!(decode_diagnostic("辞書 loaded".as_bytes()), "辞書 loaded");
        // "エラー" in Shift_JIS.
        assert_eq!(decode_diagnostic(b"\x83\x47\x83\x89\x81\x5b"), "エラー");
        assert!(!decode_diagnostic(b"\xff\xff").is_empty());
    }

    #[test]
    fn drain_survives_undecodable_lines() {
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(b"error: after garbage\n");
        input.extend_from_slice(&[b'x'; 100_000]);
        let mut reader = ReadCounter(std::io::Cursor::new(input), 0);
        drain_stderr(&mut reader);
        assert_eq!(reader.1, 3 + 21 + 100_000, "drain must consume every byte");
    }

    struct ReadCounter<R>(R, usize);

    impl<R: Read> Read for ReadCounter<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.0.read(buf)?;
            self.1 += n;
            Ok(n)
        }
    }

    #[cfg(unix)]
    #[test]
    fn abandoned_helper_is_reaped() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        abandon(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn bad_request_text() {
        assert_eq!(bad_request(), "SHIORI/3.0 400 Bad Request\r\n\r\n");
    }

    #[test]
    fn message_file_order() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_message_file(dir.path()).is_none());
        std::fs::create_dir(dir.path().join("messagetxt")).unwrap();
        std::fs::write(dir.path().join("messagetxt/english.txt"), "x").unwrap();
        assert_eq!(find_message_file(dir.path()).unwrap().file_name().unwrap(), "english.txt");
        std::fs::write(dir.path().join("messagetxt/japanese.txt"), "x").unwrap();
        assert_eq!(find_message_file(dir.path()).unwrap().file_name().unwrap(), "japanese.txt");
    }
}
