//! Scripted HTTP client for adapter tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::domain::DomainError;
use crate::ports::{HttpClient, HttpMethod, HttpRequest, HttpResponse};

struct Route {
    method: HttpMethod,
    path: String,
    replies: VecDeque<Result<HttpResponse, String>>,
}

/// Answers requests from per-route reply queues. The last reply of a
/// route repeats forever; unmatched requests get a 404.
#[derive(Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: HttpMethod, path: &str, reply: Result<HttpResponse, String>) {
        let mut routes = self.routes.lock();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            route.replies.push_back(reply);
            return;
        }
        routes.push(Route {
            method,
            path: path.to_string(),
            replies: VecDeque::from([reply]),
        });
    }

    /// Queue a response for requests whose URL contains `path`.
    pub fn respond(&self, method: HttpMethod, path: &str, status: u16, body: Value) {
        self.push(method, path, Ok(HttpResponse { status, body }));
    }

    /// Queue a transport failure.
    pub fn fail(&self, method: HttpMethod, path: &str, reason: &str) {
        self.push(method, path, Err(reason.to_string()));
    }

    /// Number of requests seen for a route.
    pub fn count(&self, method: HttpMethod, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.url.contains(path))
            .count()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Last request body sent to a route.
    pub fn last_body(&self, method: HttpMethod, path: &str) -> Option<Value> {
        self.requests
            .lock()
            .iter()
            .rev()
            .find(|r| r.method == method && r.url.contains(path))
            .and_then(|r| r.body.clone())
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DomainError> {
        self.requests.lock().push(request.clone());

        let mut routes = self.routes.lock();
        // Longest matching path wins so `/containers/json` beats `/containers`.
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.contains(&r.path))
            .max_by_key(|r| r.path.len());

        let reply = match route {
            Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
            Some(route) => route.replies.front().cloned(),
            None => None,
        };

        match reply {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(DomainError::HttpRequest(reason)),
            None => Ok(HttpResponse {
                status: 404,
                body: Value::Null,
            }),
        }
    }

    fn is_url_allowed(&self, _url: &str) -> bool {
        true
    }
}
