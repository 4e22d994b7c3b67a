use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/121.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Failures surfaced by [`ThrottledClient`].
#[derive(Debug)]
pub enum HttpError {
    /// Transport failure or non-2xx status after exhausting retries.
    Transport(String),
    /// The client itself could not be built.
    Build(String),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Transport(msg) => write!(f, "http transport error: {msg}"),
            HttpError::Build(msg) => write!(f, "http client build error: {msg}"),
        }
    }
}

impl std::error::Error for HttpError {}

/// HTTP fetcher with a per-domain minimum call interval and linear-backoff
/// retries. All upstream quote fetchers go through one of these so a burst
/// of subscriptions cannot hammer a public endpoint.
pub struct ThrottledClient {
    client: reqwest::Client,
    min_interval: Duration,
    retries: u32,
    last_call: Mutex<HashMap<String, Instant>>,
}

impl ThrottledClient {
    /// Default policy: 250 ms per-domain spacing, 2 retries, 8 s timeout.
    pub fn new() -> Result<Arc<Self>, HttpError> {
        Self::with_policy(Duration::from_millis(250), 2, Duration::from_secs(8))
    }

    pub fn with_policy(
        min_interval: Duration,
        retries: u32,
        timeout: Duration,
    ) -> Result<Arc<Self>, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Arc::new(Self {
            client,
            min_interval,
            retries,
            last_call: Mutex::new(HashMap::new()),
        }))
    }

    /// GET a URL and return the response body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let domain = extract_domain(url);

        let mut attempt: u32 = 0;
        loop {
            self.throttle(&domain).await;

            let ua = USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0]);

            let result = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, ua)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(resp) => {
                    return resp
                        .text()
                        .await
                        .map_err(|e| HttpError::Transport(e.to_string()));
                }
                Err(e) => {
                    if attempt >= self.retries {
                        return Err(HttpError::Transport(e.to_string()));
                    }
                    warn!(url, attempt, error = %e, "http fetch failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Enforce the per-domain spacing. The lock is released before sleeping.
    async fn throttle(&self, domain: &str) {
        loop {
            let wait = {
                let mut last = self.last_call.lock().expect("throttle lock poisoned");
                let now = Instant::now();
                match last.get(domain) {
                    Some(prev) if now.duration_since(*prev) < self.min_interval => {
                        Some(self.min_interval - now.duration_since(*prev))
                    }
                    _ => {
                        last.insert(domain.to_string(), now);
                        None
                    }
                }
            };
            match wait {
                Some(d) => tokio::time::sleep(d).await,
                None => return,
            }
        }
    }
}

fn extract_domain(url: &str) -> String {
    let rest = match url.find("://") {
        Some(i) => &url[i + 3..],
        None => url,
    };
    rest.split('/').next().unwrap_or(rest).to_string()
}
