// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host-facing event intake over one active backend.

use crate::backend::{BackendConfig, BackendKind, ModuleBackend};
use crate::proto::{ShioriRequest, ShioriResponse, DEFAULT_SENDER};
use crate::{Error, Result};

/// Drives one loaded module: named events in, one value string out.
///
/// The session never retries. Transport errors mean the backend should be
/// rebuilt; module failures are returned as-is.
pub struct ShioriHost {
    backend: Box<dyn ModuleBackend>,
    sender: String,
}

impl ShioriHost {
    pub fn new(backend: Box<dyn ModuleBackend>) -> Self {
        Self {
            backend,
            sender: DEFAULT_SENDER.to_owned(),
        }
    }

    /// Load the configured backend and wrap it.
    pub fn load(config: BackendConfig) -> Result<Self> {
        let kind = config.kind();
        let backend = config.load()?;
        tracing::info!(%kind, "SHIORI host ready");
        Ok(Self::new(backend))
    }

    /// `Sender` header put on every event.
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = sender.to_owned();
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_loaded()
    }

    pub fn backend_mut(&mut self) -> &mut dyn ModuleBackend {
        self.backend.as_mut()
    }

    /// Pass bytes through unchanged.
    pub fn request_raw(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.backend.request_response(request)
    }

    /// Send raw request bytes and parse the module's answer.
    pub fn send(&mut self, request: &[u8]) -> Result<ShioriResponse> {
        let raw = self.backend.request_response(request)?;
        ShioriResponse::parse_bytes(&raw).ok_or_else(|| Error::ModuleReportedFailure {
            status: 500,
            error: Some(format!("unparseable response ({} bytes)", raw.len())),
        })
    }

    pub fn request(&mut self, request: &ShioriRequest) -> Result<ShioriResponse> {
        tracing::debug!(id = ?request.id, method = ?request.method, "SHIORI request");
        self.send(request.encode().as_bytes())
    }

    /// Fire `GET <id>` with `refs` as `Reference0..N`.
    ///
    /// `204` yields an empty value; other non-2xx statuses are
    /// [`Error::ModuleReportedFailure`].
    pub fn event<S: AsRef<str>>(&mut self, id: &str, refs: &[S]) -> Result<String> {
        let req = ShioriRequest::get(id)
            .sender(&self.sender)
            .references_from(refs.iter().map(AsRef::as_ref));
        let response = self.request(&req)?;
        check_status(&response)?;
        Ok(response.value)
    }

    /// Fire `NOTIFY <id>`; any value the module returns is discarded.
    pub fn notify<S: AsRef<str>>(&mut self, id: &str, refs: &[S]) -> Result<()> {
        let req = ShioriRequest::notify(id)
            .sender(&self.sender)
            .references_from(refs.iter().map(AsRef::as_ref));
        let response = self.request(&req)?;
        check_status(&response)
    }

    pub fn unload(&mut self) {
        self.backend.unload();
    }
}

fn check_status(response: &ShioriResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(Error::ModuleReportedFailure {
        status: response.status_code().map_or(0, i32::from),
        error: Some(response.status.clone()),
    })
}

/// Module side: answer one raw request with `handler`.
///
/// Requests without an `ID` are answered `200 OK` with an empty value and
/// never reach the handler.
pub fn respond<F>(request: &[u8], handler: F) -> String
where
    F: FnOnce(&ShioriRequest) -> ShioriResponse,
{
    let req = ShioriRequest::parse_bytes(request);
    if !req.is_routable() {
        tracing::debug!("unroutable request answered empty");
        return ShioriResponse::default().build();
    }
    handler(&req).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory module: answers `Value: <ID>/<Reference0>`, 204 for `Quiet`,
    /// 500 for `Broken`.
    struct EchoBackend {
        loaded: bool,
        last: Arc<Mutex<Vec<u8>>>,
    }

    impl ModuleBackend for EchoBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Native
        }

        fn is_loaded(&self) -> bool {
            self.loaded
        }

        fn request_response(&mut self, request: &[u8]) -> Result<Vec<u8>> {
            if !self.loaded {
                return Err(Error::NotLoaded);
            }
            *self.last.lock().unwrap() = request.to_vec();
            let text = respond(request, |req| match req.id.as_deref() {
                Some("Quiet") => ShioriResponse::with_status("204 No Content", ""),
                Some("Broken") => ShioriResponse::with_status("500 Internal Server Error", ""),
                Some(id) => ShioriResponse::ok(format!("{id}/{}", req.reference(0).unwrap_or(""))),
                None => unreachable!(),
            });
            Ok(text.into_bytes())
        }

        fn unload(&mut self) {
            self.loaded = false;
        }
    }

    fn host_with_log() -> (ShioriHost, Arc<Mutex<Vec<u8>>>) {
        let last = Arc::new(Mutex::new(Vec::new()));
        let backend = EchoBackend {
            loaded: true,
            last: Arc::clone(&last),
        };
        (ShioriHost::new(Box::new(backend)), last)
    }

    fn host() -> ShioriHost {
        host_with_log().0
    }

    #[test]
    fn event_returns_value() {
        let mut host = host();
        assert_eq!(host.event("OnBoot", &["a"]).unwrap(), "OnBoot/a");
    }

    #[test]
    fn no_content_is_empty_value() {
        let mut host = host();
        assert_eq!(host.event::<&str>("Quiet", &[]).unwrap(), "");
        host.notify::<&str>("Quiet", &[]).unwrap();
    }

    #[test]
    fn server_error_is_module_failure() {
        let mut host = host();
        match host.event::<&str>("Broken", &[]).unwrap_err() {
            Error::ModuleReportedFailure { status, .. } => assert_eq!(status, 500),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sender_reaches_the_wire() {
        let (host, last) = host_with_log();
        let mut host = host.with_sender("Ourin");
        host.event::<&str>("OnBoot", &[]).unwrap();
        let sent = String::from_utf8(last.lock().unwrap().clone()).unwrap();
        assert!(sent.contains("\r\nSender: Ourin\r\n"));
    }

    #[test]
    fn unload_then_event_is_not_loaded() {
        let mut host = host();
        host.unload();
        assert!(!host.is_loaded());
        assert!(matches!(host.event::<&str>("OnBoot", &[]), Err(Error::NotLoaded)));
    }

    #[test]
    fn respond_answers_unroutable_with_empty_value() {
        let text = respond(b"GET SHIORI/3.0\r\n\r\n", |_| unreachable!());
        assert_eq!(text, ShioriResponse::default().build());
    }
}
