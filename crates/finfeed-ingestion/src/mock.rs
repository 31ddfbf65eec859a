//! Scripted in-process [`Transport`] for tests and dry runs.
//!
//! Each URL has a queue of one-shot steps consumed first, then a standing
//! behaviour used for every later attempt.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::fetcher::{Transport, TransportError, TransportResponse};

#[derive(Debug, Clone)]
enum Step {
    Respond(TransportResponse),
    RespondAfter(Duration, TransportResponse),
    Fail(TransportError),
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Step>,
    standing: Option<Step>,
    attempts: usize,
}

#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, Script>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<R>(&self, url: &str, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        f(scripts.entry(url.to_string()).or_default())
    }

    /// Answer every later request to `url` with this response.
    pub fn respond(&self, url: &str, status: u16, content_type: Option<&str>, body: &[u8]) {
        let resp = TransportResponse {
            status,
            content_type: content_type.map(|s| s.to_string()),
            body: body.to_vec(),
        };
        self.with_script(url, |s| s.standing = Some(Step::Respond(resp)));
    }

    /// Answer with a 200 only after `delay`.
    pub fn respond_after(&self, url: &str, delay: Duration, status: u16, body: &[u8]) {
        let resp = TransportResponse { status, content_type: None, body: body.to_vec() };
        self.with_script(url, |s| s.standing = Some(Step::RespondAfter(delay, resp)));
    }

    /// Fail the next `times` requests to `url` before falling back to the standing behaviour.
    pub fn fail_times(&self, url: &str, times: usize, error: TransportError) {
        self.with_script(url, |s| {
            for _ in 0..times {
                s.queue.push_back(Step::Fail(error.clone()));
            }
        });
    }

    /// Fail every later request to `url`.
    pub fn fail_always(&self, url: &str, error: TransportError) {
        self.with_script(url, |s| {
            s.queue.clear();
            s.standing = Some(Step::Fail(error));
        });
    }

    /// Number of `get` calls seen for `url`.
    pub fn attempts(&self, url: &str) -> usize {
        let scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.get(url).map(|s| s.attempts).unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        let scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.values().map(|s| s.attempts).sum()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<TransportResponse, TransportError> {
        let step = self.with_script(url, |s| {
            s.attempts += 1;
            s.queue.pop_front().or_else(|| s.standing.clone())
        });

        match step {
            Some(Step::Respond(resp)) => Ok(resp),
            Some(Step::RespondAfter(delay, resp)) => {
                tokio::time::sleep(delay).await;
                Ok(resp)
            }
            Some(Step::Fail(e)) => Err(e),
            None => Err(TransportError::Other(format!("no scripted response for {url}"))),
        }
    }
}
