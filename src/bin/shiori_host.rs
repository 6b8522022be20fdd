// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Demo host: claim the FMO registry, load a ghost's SHIORI module and fire
// events at it.
//
// Usage:
//   shiori_host <ghost_dir> [event ...]
//
// <ghost_dir> is the directory holding ghost/master/descript.txt. Each
// event is `ID` or `ID:ref0,ref1,...`; without events OnBoot is sent.
// The returned values are printed on stdout, one per line. OnClose is
// sent before the module is unloaded.
//
// Set SHIORI_FMO_MUTEX / SHIORI_FMO_SHARED to use other registry names,
// SHIORI_YAYA_CORE to pick the YAYA helper, RUST_LOG for log verbosity.

use std::path::PathBuf;
use std::process::ExitCode;

use libshiori::{BackendConfig, Error, FmoRegistry, ShioriHost};
use tracing_subscriber::EnvFilter;

const SENDER: &str = "shiori_host";

struct Event {
    id: String,
    refs: Vec<String>,
}

impl Event {
    fn parse(arg: &str) -> Self {
        match arg.split_once(':') {
            Some((id, refs)) => Self {
                id: id.to_owned(),
                refs: refs.split(',').map(str::to_owned).collect(),
            },
            None => Self {
                id: arg.to_owned(),
                refs: Vec::new(),
            },
        }
    }
}

fn usage() -> ExitCode {
    eprintln!("usage: shiori_host <ghost_dir> [event[:ref0,ref1,...] ...]");
    ExitCode::from(2)
}

/// `<pid>.path\x01<ghost_dir>\r\n`, the registry entry for this host.
fn registry_entry(ghost: &std::path::Path) -> Vec<u8> {
    format!("{}.path\x01{}\r\n", std::process::id(), ghost.display()).into_bytes()
}

fn claim_registry(ghost: &std::path::Path) -> Option<FmoRegistry> {
    match FmoRegistry::open_default() {
        Ok(fmo) => {
            match fmo.publish(&registry_entry(ghost)) {
                Ok(stored) => tracing::debug!(bytes = stored, "registry entry published"),
                Err(e) => tracing::warn!(error = %e, "registry publish failed"),
            }
            Some(fmo)
        }
        Err(e) if e.is_already_running() => {
            tracing::warn!(error = %e, "another host owns the registry, running as secondary");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "registry unavailable");
            None
        }
    }
}

fn run(ghost: PathBuf, events: Vec<Event>) -> Result<(), Error> {
    let config = BackendConfig::for_ghost(&ghost)?;
    let mut host = ShioriHost::load(config)?.with_sender(SENDER);

    let mut outcome = Ok(());
    for event in &events {
        match host.event(&event.id, event.refs.as_slice()) {
            Ok(value) => println!("{}: {value}", event.id),
            Err(e) if e.is_transport() => {
                tracing::error!(id = %event.id, error = %e, "module connection lost");
                outcome = Err(e);
                break;
            }
            Err(e) => tracing::warn!(id = %event.id, error = %e, "event failed"),
        }
    }

    if host.is_loaded() {
        if let Err(e) = host.notify::<&str>("OnClose", &[]) {
            tracing::warn!(error = %e, "OnClose failed");
        }
    }
    host.unload();
    outcome
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(ghost) = args.next().map(PathBuf::from) else {
        return usage();
    };
    let mut events: Vec<Event> = args.map(|a| Event::parse(&a)).collect();
    if events.is_empty() {
        events.push(Event::parse("OnBoot"));
    }

    let mut registry = claim_registry(&ghost);
    let result = run(ghost, events);
    if let Some(fmo) = registry.as_mut() {
        fmo.cleanup();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("shiori_host: {e}");
            ExitCode::FAILURE
        }
    }
}
