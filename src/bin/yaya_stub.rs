// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A stand-in for yaya_core speaking the JSON-line helper protocol.
//
// Usage:
//   yaya_stub [--no-capability] [--mute-unload] [--ignore-term] [--stderr-flood]
//
// --mute-unload stops answering (and reading) at `unload`; --ignore-term
// ignores SIGTERM. Together they force the host to kill the helper.
// --stderr-flood writes a line that is not valid text, then 256 KiB of
// diagnostics to stderr before answering `load`.
//
// Reads one envelope per line on stdin, answers one per line on stdout,
// logs to stderr. Answers are flushed once no further request is already
// buffered, so back-to-back requests get their answers in a single write.
//
// Request ids with fixed behaviour:
//   OnBoot    200 with a short script
//   Echo      Reference0..N joined with ','
//   Sender    the Sender header
//   Messages  file name of the loaded message catalogue
//   Shout     204, plus an error line on stderr
//   Fail      ok:false, 500
//   Hang      204 after five seconds
//   Garbage   a line that is not JSON
//   Crash     exit without answering
//   anything else: 204

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use libshiori::backend::{frame, HelperRequest, HelperResponse};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Options {
    no_capability: bool,
    mute_unload: bool,
    ignore_term: bool,
    stderr_flood: bool,
}

enum Reply {
    Json(HelperResponse),
    Raw(&'static str),
    Exit,
    Stall,
}

#[derive(Default)]
struct Stub {
    options: Options,
    loaded: bool,
    messages: Option<PathBuf>,
}

impl Stub {
    fn handle(&mut self, req: HelperRequest) -> Reply {
        match req.cmd.as_str() {
            "load_messages" => self.load_messages(req),
            "load" => self.load(req),
            "request" => self.request(req),
            "unload" => {
                self.loaded = false;
                if self.options.mute_unload {
                    Reply::Stall
                } else {
                    Reply::Json(HelperResponse::success(200, None))
                }
            }
            other => Reply::Json(HelperResponse::failure(400, format!("unknown command `{other}`"))),
        }
    }

    fn load_messages(&mut self, req: HelperRequest) -> Reply {
        match req.message_path.map(PathBuf::from) {
            Some(path) if path.is_file() => {
                tracing::info!(path = %path.display(), "message catalogue loaded");
                self.messages = Some(path);
                Reply::Json(HelperResponse::success(200, None))
            }
            _ => Reply::Json(HelperResponse::failure(404, "message file not found")),
        }
    }

    fn load(&mut self, req: HelperRequest) -> Reply {
        let root = PathBuf::from(req.ghost_root.unwrap_or_default());
        let dics = req.dic.unwrap_or_default();
        if dics.is_empty() {
            return Reply::Json(HelperResponse::failure(500, "no dictionaries"));
        }
        let mut loaded = Vec::with_capacity(dics.len());
        for dic in &dics {
            let path = root.join(dic);
            if !path.is_file() {
                tracing::error!(dic = %path.display(), "dictionary not found");
                return Reply::Json(HelperResponse::failure(500, format!("dictionary not found: {dic}")));
            }
            loaded.push(path.to_string_lossy().into_owned());
        }
        if self.options.stderr_flood {
            flood_stderr();
        }
        tracing::info!(count = loaded.len(), "dictionaries loaded");
        self.loaded = true;
        Reply::Json(HelperResponse {
            loaded_dics: Some(loaded),
            ..HelperResponse::success(200, None)
        })
    }

    fn request(&mut self, req: HelperRequest) -> Reply {
        if !self.loaded {
            return Reply::Json(HelperResponse::failure(500, "not loaded"));
        }
        let id = req.id.unwrap_or_default();
        let headers = req.headers.unwrap_or_default();
        let refs = req.refs.unwrap_or_default();
        let value = |v: String| {
            Reply::Json(HelperResponse {
                headers: Some(BTreeMap::from([("Charset".to_owned(), "UTF-8".to_owned())])),
                ..HelperResponse::success(200, Some(v))
            })
        };

        match id.as_str() {
            "capability" if self.options.no_capability => {
                Reply::Json(HelperResponse::failure(400, "capability unsupported"))
            }
            "capability" => value("yaya_stub".to_owned()),
            "OnBoot" => value("\\0\\s[0]Hello\\e".to_owned()),
            "Echo" => value(refs.join(",")),
            "Sender" => value(headers.get("Sender").cloned().unwrap_or_default()),
            "Messages" => value(
                self.messages
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            "Shout" => {
                eprintln!("error: asked to shout");
                Reply::Json(HelperResponse::success(204, None))
            }
            "Fail" => Reply::Json(HelperResponse::failure(500, "forced failure")),
            "Hang" => {
                thread::sleep(Duration::from_secs(5));
                Reply::Json(HelperResponse::success(204, None))
            }
            "Garbage" => Reply::Raw("this is not json"),
            "Crash" => Reply::Exit,
            _ => Reply::Json(HelperResponse::success(204, None)),
        }
    }
}

fn parse_options() -> Options {
    let mut options = Options::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--no-capability" => options.no_capability = true,
            "--mute-unload" => options.mute_unload = true,
            "--ignore-term" => options.ignore_term = true,
            "--stderr-flood" => options.stderr_flood = true,
            other => {
                eprintln!("usage: yaya_stub [--no-capability] [--mute-unload] [--ignore-term] [--stderr-flood]");
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
    }
    options
}

/// Far more than a pipe buffer holds, so a reader that stops draining
/// leaves this process blocked.
fn flood_stderr() {
    let mut err = io::stderr().lock();
    let _ = err.write_all(b"\xff\xfe\x83 dictionary warning\n");
    let line = [b'x'; 1023];
    for _ in 0..256 {
        let _ = err.write_all(&line);
        let _ = err.write_all(b"\n");
    }
    let _ = err.flush();
}

fn ignore_sigterm() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGTERM, libc::SIG_IGN);
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let mut stub = Stub {
        options: parse_options(),
        ..Stub::default()
    };
    if stub.options.ignore_term {
        ignore_sigterm();
    }

    let mut input = BufReader::new(io::stdin());
    let mut output = BufWriter::new(io::stdout());
    loop {
        let line = match frame::read_line(&mut input) {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "input failed");
                break;
            }
        };
        let reply = match frame::decode::<HelperRequest>(&line) {
            Ok(req) => stub.handle(req),
            Err(e) => Reply::Json(HelperResponse::failure(400, e.to_string())),
        };

        match reply {
            Reply::Json(response) => {
                let mut bytes = serde_json::to_vec(&response).map_err(io::Error::other)?;
                bytes.push(b'\n');
                output.write_all(&bytes)?;
            }
            Reply::Raw(text) => {
                output.write_all(text.as_bytes())?;
                output.write_all(b"\n")?;
            }
            Reply::Exit => {
                output.flush()?;
                std::process::exit(3);
            }
            Reply::Stall => {
                output.flush()?;
                tracing::info!("unload muted, stalling");
                loop {
                    thread::sleep(Duration::from_secs(60));
                }
            }
        }
        if input.buffer().is_empty() {
            output.flush()?;
        }
    }
    output.flush()?;
    tracing::info!("stdin closed, exiting");
    Ok(())
}
