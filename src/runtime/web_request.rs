//! Web request collaborator.
//!
//! The HTTP client itself is an external [`WebRequestSync`]; this module only
//! moves its blocking GET onto a scheduler.

use crate::runtime::executor::Scheduler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Mozilla-compatible request status codes.
pub const NS_OK: i64 = 0;
pub const NS_ERROR_FAILURE: i64 = 0x8000_4005;
pub const NS_ERROR_OUT_OF_MEMORY: i64 = 0x8007_000e;
pub const NS_ERROR_MALFORMED_URI: i64 = 0x804b_000a;
pub const NS_ERROR_CONNECTION_REFUSED: i64 = 0x804b_000d;
pub const NS_ERROR_NET_TIMEOUT: i64 = 0x804b_000e;
pub const NS_ERROR_NO_CONTENT: i64 = 0x804b_0011;
pub const NS_ERROR_UNKNOWN_PROTOCOL: i64 = 0x804b_0012;
pub const NS_ERROR_NET_RESET: i64 = 0x804b_0014;
pub const NS_ERROR_UNKNOWN_HOST: i64 = 0x804b_001e;
pub const NS_ERROR_REDIRECT_LOOP: i64 = 0x804b_001f;
pub const NS_ERROR_UNKNOWN_PROXY_HOST: i64 = 0x804b_002a;
pub const NS_ERROR_NET_INTERRUPT: i64 = 0x804b_0047;
pub const NS_ERROR_UNKNOWN_PROXY_CONNECTION_REFUSED: i64 = 0x804b_0048;
pub const NS_CUSTOM_ERROR_BASE: i64 = 0x8085_0000;
pub const NS_ERROR_NOT_INITIALIZED: i64 = 0xc1f3_0001;

pub type HeaderList = Vec<(String, String)>;

/// Outcome of a GET request.
///
/// `status` is `NS_OK` whenever the server answered, even with an HTTP error;
/// the HTTP code is in `response_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    pub status: i64,
    pub response_status: u16,
    pub response_headers: HeaderList,
    pub response_text: String,
}

impl ServerResponse {
    pub fn failure(status: i64) -> Self {
        Self {
            status,
            response_status: 0,
            response_headers: Vec::new(),
            response_text: String::new(),
        }
    }
}

impl Default for ServerResponse {
    fn default() -> Self {
        Self::failure(NS_ERROR_FAILURE)
    }
}

/// Blocking HTTP GET.
pub trait WebRequestSync: Send + Sync {
    fn get(&self, url: &str, headers: &HeaderList) -> ServerResponse;
}

/// Client used when no HTTP stack is available: every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyWebRequest;

impl WebRequestSync for DummyWebRequest {
    fn get(&self, url: &str, _headers: &HeaderList) -> ServerResponse {
        tracing::debug!(url, "no web request implementation available");
        ServerResponse::failure(NS_ERROR_FAILURE)
    }
}

pub type GetCallback = Box<dyn FnOnce(ServerResponse) + Send>;

/// Asynchronous GET with callback completion.
pub trait WebRequest: Send + Sync {
    fn get(&self, url: &str, headers: HeaderList, callback: GetCallback);
}

/// Runs a [`WebRequestSync`] on a scheduler.
pub struct DefaultWebRequest {
    scheduler: Scheduler,
    sync: Arc<dyn WebRequestSync>,
}

impl DefaultWebRequest {
    pub fn new(scheduler: Scheduler, sync: Arc<dyn WebRequestSync>) -> Self {
        Self { scheduler, sync }
    }
}

impl WebRequest for DefaultWebRequest {
    fn get(&self, url: &str, headers: HeaderList, callback: GetCallback) {
        let sync = self.sync.clone();
        let url = url.to_string();
        (self.scheduler)(Box::new(move || {
            tracing::trace!(url = %url, "GET");
            callback(sync.get(&url, &headers));
        }));
    }
}
