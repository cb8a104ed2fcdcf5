//! Captured network exchanges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Request half of a captured exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub url: String,
    pub method: String,
    /// Epoch milliseconds when the request was issued.
    pub timestamp: i64,
}

/// Response half of a captured exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Milliseconds between request and response.
    pub response_time: i64,
}

/// One network exchange. Produced once per request, never mutated
/// after completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedApiCall {
    pub request: ApiRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ApiResponse>,
    #[serde(default)]
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CapturedApiCall {
    pub fn pending(url: impl Into<String>, method: impl Into<String>, timestamp: i64) -> Self {
        Self {
            request: ApiRequest {
                url: url.into(),
                method: method.into(),
                timestamp,
            },
            response: None,
            pending: true,
            error: None,
        }
    }

    pub fn completed(
        url: impl Into<String>,
        method: impl Into<String>,
        timestamp: i64,
        status: u16,
        response_time: i64,
    ) -> Self {
        Self {
            request: ApiRequest {
                url: url.into(),
                method: method.into(),
                timestamp,
            },
            response: Some(ApiResponse {
                status,
                headers: BTreeMap::new(),
                body: None,
                response_time,
            }),
            pending: false,
            error: None,
        }
    }

    /// When the exchange finished, as epoch milliseconds.
    pub fn completion_timestamp(&self) -> Option<i64> {
        self.response
            .as_ref()
            .map(|r| self.request.timestamp + r.response_time)
    }
}

/// Ordered log of captured exchanges, shared between the interception
/// task and the consumer.
#[derive(Debug, Default)]
pub struct ApiCallLog {
    calls: Vec<CapturedApiCall>,
}

impl ApiCallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, call: CapturedApiCall) {
        self.calls.push(call);
    }

    /// Attach the response to the most recent pending call for a URL.
    pub fn complete(&mut self, url: &str, response: ApiResponse) {
        if let Some(call) = self
            .calls
            .iter_mut()
            .rev()
            .find(|c| c.pending && c.request.url == url)
        {
            call.response = Some(response);
            call.pending = false;
        }
    }

    /// Attach a response observed at `now`, deriving the response time
    /// from the request timestamp.
    pub fn complete_at(&mut self, url: &str, status: u16, now: i64) {
        if let Some(call) = self
            .calls
            .iter_mut()
            .rev()
            .find(|c| c.pending && c.request.url == url)
        {
            call.response = Some(ApiResponse {
                status,
                headers: BTreeMap::new(),
                body: None,
                response_time: (now - call.request.timestamp).max(0),
            });
            call.pending = false;
        }
    }

    /// Mark the most recent pending call for a URL as failed.
    pub fn fail(&mut self, url: &str, error: impl Into<String>) {
        if let Some(call) = self
            .calls
            .iter_mut()
            .rev()
            .find(|c| c.pending && c.request.url == url)
        {
            call.error = Some(error.into());
            call.pending = false;
        }
    }

    pub fn snapshot(&self) -> Vec<CapturedApiCall> {
        self.calls.clone()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

/// Shared handle to an [`ApiCallLog`].
pub type SharedApiLog = Arc<Mutex<ApiCallLog>>;

/// Fresh shared log.
pub fn shared_api_log() -> SharedApiLog {
    Arc::new(Mutex::new(ApiCallLog::new()))
}
