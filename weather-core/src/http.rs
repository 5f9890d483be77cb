//! Shared outbound HTTP client with rate limiting and jittered exponential backoff.
//!
//! Every attempt takes a token from the provider's bucket before anything
//! else. Ordinary HTTP and transport failures never surface as `Err`: the
//! caller always gets a [`FetchOutcome`] describing what happened.

use std::time::Duration;

use rand::Rng;
use reqwest::{StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::Result,
    provider::ProviderId,
    rate_limit::RateLimiter,
};

/// Backoff delays never drop below this, whatever the jitter.
pub const MIN_RETRY_DELAY_SECS: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub backoff_multiplier: f64,
    pub max_delay_secs: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1.0,
            backoff_multiplier: 2.0,
            max_delay_secs: 16.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `min(max_delay, base * multiplier^attempt)`, before jitter.
    pub fn nominal_delay_secs(&self, attempt: u32) -> f64 {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        (self.base_delay_secs * self.backoff_multiplier.powi(exp)).min(self.max_delay_secs)
    }

    /// Nominal delay for `attempt` (0-based) with `± delay * jitter_factor`
    /// uniform jitter, floored at [`MIN_RETRY_DELAY_SECS`].
    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let delay = self.nominal_delay_secs(attempt);
        let jitter = if self.jitter_factor > 0.0 {
            delay * self.jitter_factor * rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };

        let secs = (delay + jitter).max(MIN_RETRY_DELAY_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs_f64(MIN_RETRY_DELAY_SECS))
    }
}

/// Connect and total bounds for one provider's requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timeouts {
    #[serde(rename = "connect_secs", serialize_with = "as_secs")]
    pub connect: Duration,
    #[serde(rename = "total_secs", serialize_with = "as_secs")]
    pub total: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// One logical upstream call.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    /// Bucket the attempts are charged to.
    pub rate_identity: ProviderId,
    /// Name used in logs ("OpenWeatherMap", "Geocoding", ...).
    pub name: &'a str,
    pub url: &'a str,
    pub params: &'a [(&'a str, String)],
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success {
        body: Value,
        elapsed_ms: u64,
        attempts: u32,
    },
    Failure {
        reason: String,
        elapsed_ms: u64,
        attempts: u32,
    },
}

impl FetchOutcome {
    pub fn elapsed_ms(&self) -> u64 {
        match self {
            FetchOutcome::Success { elapsed_ms, .. } | FetchOutcome::Failure { elapsed_ms, .. } => {
                *elapsed_ms
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            FetchOutcome::Success { attempts, .. } | FetchOutcome::Failure { attempts, .. } => *attempts,
        }
    }
}

/// What one attempt concluded.
enum Attempt {
    Done(Value),
    Retry(String),
    GiveUp(String),
}

#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(client: reqwest::Client, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self { client, limiter, retry }
    }

    /// Build the pooled client, one bucket per provider and the retry policy from `config`.
    ///
    /// reqwest only takes a connect timeout per client, so the largest
    /// configured connect bound is used for all providers.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings: Vec<_> = ProviderId::all()
            .iter()
            .map(|&id| (id, config.provider_settings(id)))
            .collect();

        let connect_timeout = settings
            .iter()
            .map(|(_, s)| s.timeouts.connect)
            .max()
            .unwrap_or(Duration::from_secs(2));

        let client = reqwest::Client::builder()
            .user_agent(concat!("weather-core/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(config.connection.keepalive_secs))
            .pool_max_idle_per_host(config.connection.pool_max_idle_per_host)
            .build()?;

        let limiter = RateLimiter::new(settings.iter().map(|(id, s)| (*id, s.rate_limit)));

        debug!(
            connect_timeout_ms = connect_timeout.as_millis() as u64,
            max_retries = config.retry.max_retries,
            "HTTP client initialised"
        );

        Ok(Self::new(client, limiter, config.retry.clone()))
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run `req` with up to `max_retries + 1` attempts.
    pub async fn request(&self, req: ProviderRequest<'_>) -> FetchOutcome {
        let started = Instant::now();
        let total_attempts = self.retry.total_attempts();
        let param_names: Vec<&str> = req.params.iter().map(|(k, _)| *k).collect();
        let mut last_error = String::from("No attempts made");

        for attempt in 1..=total_attempts {
            self.limiter.acquire(req.rate_identity).await;

            if attempt > 1 {
                let delay = self.retry.calculate_retry_delay(attempt - 2);
                info!(
                    provider = req.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            debug!(provider = req.name, attempt, url = req.url, params = ?param_names, "Sending request");

            match self.attempt(&req).await {
                Attempt::Done(body) => {
                    let elapsed_ms = elapsed_ms(started);
                    info!(provider = req.name, attempt, elapsed_ms, "Request succeeded");
                    return FetchOutcome::Success { body, elapsed_ms, attempts: attempt };
                }
                Attempt::Retry(reason) => {
                    warn!(provider = req.name, attempt, error = %reason, "Request attempt failed");
                    last_error = reason;
                }
                Attempt::GiveUp(reason) => {
                    let elapsed_ms = elapsed_ms(started);
                    warn!(provider = req.name, attempt, elapsed_ms, error = %reason, "Request failed, not retrying");
                    return FetchOutcome::Failure { reason, elapsed_ms, attempts: attempt };
                }
            }
        }

        let elapsed_ms = elapsed_ms(started);
        let reason = format!("Failed after {total_attempts} attempts: {last_error}");
        warn!(provider = req.name, elapsed_ms, error = %reason, "Retries exhausted");
        FetchOutcome::Failure { reason, elapsed_ms, attempts: total_attempts }
    }

    async fn attempt(&self, req: &ProviderRequest<'_>) -> Attempt {
        let sent = self
            .client
            .get(req.url)
            .query(req.params)
            .timeout(req.timeout)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(err) => return self.classify_transport_error(req, err),
        };

        let status = response.status();
        let code = status.as_u16();

        if status == StatusCode::OK {
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => return self.classify_transport_error(req, err),
            };
            return match serde_json::from_slice::<Value>(&bytes) {
                Ok(body) => Attempt::Done(body),
                Err(err) => Attempt::Retry(format!("Invalid JSON response: {err}")),
            };
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            self.limiter.refund(req.rate_identity);
            if let Some(retry_after) = response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
                warn!(provider = req.name, retry_after, "Upstream asked us to back off");
            }
            return Attempt::Retry(format!("Rate limited (HTTP {code})"));
        }

        if status.is_server_error() {
            return Attempt::Retry(format!("Server error (HTTP {code})"));
        }

        if status.is_client_error() {
            return Attempt::GiveUp(format!("Client error (HTTP {code})"));
        }

        Attempt::Retry(format!("Unexpected status (HTTP {code})"))
    }

    fn classify_transport_error(&self, req: &ProviderRequest<'_>, err: reqwest::Error) -> Attempt {
        if err.is_timeout() {
            return Attempt::Retry(format!(
                "Request timeout after {}s",
                req.timeout.as_secs_f64()
            ));
        }

        if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
            return Attempt::Retry(format!("Network error: {err}"));
        }

        // Builder/redirect errors are bugs or misconfiguration, not transient.
        self.limiter.refund(req.rate_identity);
        Attempt::GiveUp(format!("Unexpected error: {err}"))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_secs: 0.0,
            backoff_multiplier: 2.0,
            max_delay_secs: 0.0,
            jitter_factor: 0.0,
        }
    }

    fn client(max_retries: u32) -> HttpClient {
        let limiter = RateLimiter::new([(
            ProviderId::OpenWeather,
            RateLimitSettings { max_tokens: 100, refill_per_sec: 100.0 },
        )]);
        HttpClient::new(reqwest::Client::new(), limiter, fast_policy(max_retries))
    }

    fn request<'a>(url: &'a str, params: &'a [(&'a str, String)]) -> ProviderRequest<'a> {
        ProviderRequest {
            rate_identity: ProviderId::OpenWeather,
            name: "OpenWeatherMap",
            url,
            params,
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn retry_delay_grows_then_caps() {
        let policy = RetryPolicy::default();

        for _ in 0..50 {
            let d0 = policy.calculate_retry_delay(0).as_secs_f64();
            assert!((0.9..=1.1).contains(&d0), "{d0}");

            let d2 = policy.calculate_retry_delay(2).as_secs_f64();
            assert!((3.6..=4.4).contains(&d2), "{d2}");

            let d10 = policy.calculate_retry_delay(10).as_secs_f64();
            assert!((14.4..=17.6).contains(&d10), "{d10}");
        }
        assert_eq!(policy.nominal_delay_secs(10), 16.0);
    }

    #[test]
    fn retry_delay_is_floored() {
        let policy = fast_policy(3);
        let delay = policy.calculate_retry_delay(0).as_secs_f64();
        assert!((delay - MIN_RETRY_DELAY_SECS).abs() < 1e-6, "{delay}");
        assert_eq!(policy.total_attempts(), 4);
    }

    #[tokio::test]
    async fn success_returns_body_and_attempt_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("q", "Singapore"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "main": { "temp": 28.5 } })))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/weather", server.uri());
        let params = [("q", "Singapore".to_string())];
        let outcome = client(3).request(request(&url, &params)).await;

        match outcome {
            FetchOutcome::Success { body, attempts, .. } => {
                assert_eq!(body["main"]["temp"], 28.5);
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/weather", server.uri());
        let outcome = client(3).request(request(&url, &[])).await;

        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(
            outcome,
            FetchOutcome::Failure { ref reason, .. } if reason == "Client error (HTTP 401)"
        ));
    }

    #[tokio::test]
    async fn server_errors_exhaust_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let url = format!("{}/weather", server.uri());
        let outcome = client(2).request(request(&url, &[])).await;

        assert_eq!(outcome.attempts(), 3);
        match outcome {
            FetchOutcome::Failure { reason, .. } => {
                assert_eq!(reason, "Failed after 3 attempts: Server error (HTTP 503)");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let url = format!("{}/weather", server.uri());
        let outcome = client(3).request(request(&url, &[])).await;

        assert!(matches!(outcome, FetchOutcome::Success { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn rate_limited_response_refunds_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .mount(&server)
            .await;

        let limiter = RateLimiter::new([(
            ProviderId::OpenWeather,
            RateLimitSettings { max_tokens: 2, refill_per_sec: 0.001 },
        )]);
        let http = HttpClient::new(reqwest::Client::new(), limiter, fast_policy(1));

        let url = format!("{}/weather", server.uri());
        let outcome = http.request(request(&url, &[])).await;

        match outcome {
            FetchOutcome::Failure { reason, attempts, .. } => {
                assert_eq!(attempts, 2);
                assert!(reason.ends_with("Rate limited (HTTP 429)"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let bucket = http.limiter().bucket(ProviderId::OpenWeather).unwrap();
        assert!(bucket.available() >= 1.9);
    }

    #[tokio::test]
    async fn malformed_url_gives_up_and_refunds_token() {
        let limiter = RateLimiter::new([(
            ProviderId::OpenWeather,
            RateLimitSettings { max_tokens: 2, refill_per_sec: 0.001 },
        )]);
        let http = HttpClient::new(reqwest::Client::new(), limiter, fast_policy(3));

        let outcome = http.request(request("not a url", &[])).await;

        match outcome {
            FetchOutcome::Failure { reason, attempts, .. } => {
                assert_eq!(attempts, 1);
                assert!(reason.starts_with("Unexpected error: "), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let bucket = http.limiter().bucket(ProviderId::OpenWeather).unwrap();
        assert_eq!(bucket.available(), 2.0);
    }

    #[tokio::test]
    async fn invalid_json_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .expect(2)
            .mount(&server)
            .await;

        let url = format!("{}/weather", server.uri());
        let outcome = client(1).request(request(&url, &[])).await;

        match outcome {
            FetchOutcome::Failure { reason, .. } => assert!(reason.contains("Invalid JSON response")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let url = format!("{}/weather", server.uri());
        let params: [(&str, String); 0] = [];
        let mut req = request(&url, &params);
        req.timeout = Duration::from_millis(200);
        let outcome = client(0).request(req).await;

        match outcome {
            FetchOutcome::Failure { reason, attempts, .. } => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("Request timeout after 0.2s"), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_a_network_error() {
        // Bind then drop to get a port nothing is listening on.
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}/weather");

        let outcome = client(0).request(request(&url, &[])).await;

        match outcome {
            FetchOutcome::Failure { reason, .. } => assert!(reason.contains("Network error"), "{reason}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
