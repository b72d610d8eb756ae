//! Scripted in-memory transport for tests

use crate::error::UnsealError;
use crate::platform::transport::{HopRequest, HopResponse, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: String,
    final_url: Option<String>,
    delay: Option<Duration>,
}

/// Answers fixed URLs with fixed bodies and records every request
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: HashMap<String, Route>,
    requests: Mutex<Vec<HopRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(mut self, url: &str, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status: 200,
                body: body.to_string(),
                final_url: None,
                delay: None,
            },
        );
        self
    }

    pub(crate) fn route_status(mut self, url: &str, status: u16) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status,
                body: String::new(),
                final_url: None,
                delay: None,
            },
        );
        self
    }

    pub(crate) fn redirect(mut self, url: &str, final_url: &str, body: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status: 200,
                body: body.to_string(),
                final_url: Some(final_url.to_string()),
                delay: None,
            },
        );
        self
    }

    pub(crate) fn delayed(mut self, url: &str, body: &str, delay: Duration) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                status: 200,
                body: body.to_string(),
                final_url: None,
                delay: Some(delay),
            },
        );
        self
    }

    pub(crate) fn requests(&self) -> Vec<HopRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub(crate) fn fetched(&self, url: &str) -> bool {
        self.requests().iter().any(|r| r.url == url)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, request: &HopRequest) -> Result<HopResponse, UnsealError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let route = self
            .routes
            .get(&request.url)
            .cloned()
            .ok_or_else(|| UnsealError::UpstreamUnavailable(format!("{}: connection refused", request.url)))?;
        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(HopResponse {
            status: route.status,
            final_url: route.final_url.unwrap_or_else(|| request.url.clone()),
            body: route.body,
        })
    }
}
