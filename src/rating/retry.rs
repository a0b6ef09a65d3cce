use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::client::ChatRequest;
use super::validation::{error_message, validate_response};
use super::{HttpReply, RatingClient};
use crate::config::RetryConfig;

/// What a single reply means for the retry loop
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyClass {
    /// Empty body, non-2xx status, unparsable JSON or transport failure
    Transient(String),
    /// Error payload asking us to slow down
    RateLimited { wait: Duration, message: String },
    /// Any other error payload
    ApiError(String),
    /// Well-formed completion that breaks the rubric contract
    Invalid { response: Value, reason: String },
    Valid { response: Value, feature_count: usize },
}

/// Final outcome for one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Accepted { response: Value, feature_count: usize },
    /// Attempts exhausted; the last invalid response is kept for audit
    Invalid { response: Value, reason: String },
    /// Attempts exhausted without any response worth storing
    Abandoned { reason: String },
}

fn wait_hint_regex() -> &'static Regex {
    static WAIT_HINT: OnceLock<Regex> = OnceLock::new();
    WAIT_HINT.get_or_init(|| {
        Regex::new(r"try again in ([\d.]+)\s*(ms|s)\b").expect("valid wait hint regex")
    })
}

/// Longest wait honoured from a server hint
pub const MAX_WAIT_HINT: Duration = Duration::from_secs(600);

/// Wait suggested by a rate-limit message such as "try again in 1.5s",
/// capped at `MAX_WAIT_HINT`
pub fn parse_wait_hint(message: &str) -> Option<Duration> {
    let captures = wait_hint_regex().captures(message)?;
    let amount: f64 = captures[1].parse().ok()?;
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let seconds = match &captures[2] {
        "ms" => amount / 1000.0,
        _ => amount,
    };
    let wait = Duration::try_from_secs_f64(seconds).unwrap_or(MAX_WAIT_HINT);
    Some(wait.min(MAX_WAIT_HINT))
}

fn is_rate_limit_error(error: &Value) -> bool {
    let field = |name: &str| error.get(name).and_then(Value::as_str).unwrap_or_default();
    let message = field("message").to_lowercase();

    field("type") == "tokens"
        || field("code") == "rate_limit_exceeded"
        || message.contains("rate_limit")
        || message.contains("rate limit")
}

/// Classify one reply. Rate-limit payloads are recognised whatever the
/// status; any other non-2xx reply is transient.
pub fn classify_reply(reply: &HttpReply, expected_features: usize, retry: &RetryConfig) -> ReplyClass {
    if reply.body.trim().is_empty() {
        return ReplyClass::Transient("Empty response".to_string());
    }

    let parsed = serde_json::from_str::<Value>(&reply.body);

    if let Ok(response) = &parsed {
        if let Some(error) = response.get("error") {
            if is_rate_limit_error(error) {
                let message = error_message(response).unwrap_or_default();
                let wait = parse_wait_hint(&message)
                    .unwrap_or_else(|| retry.rate_limit_default_wait())
                    .saturating_add(retry.rate_limit_buffer());
                return ReplyClass::RateLimited { wait, message };
            }
        }
    }

    if !reply.is_success() {
        let snippet: String = reply.body.chars().take(200).collect();
        return ReplyClass::Transient(format!("HTTP {}: {}", reply.status, snippet));
    }

    let response = match parsed {
        Ok(response) => response,
        Err(e) => return ReplyClass::Transient(format!("JSON parse error: {}", e)),
    };

    if let Some(message) = error_message(&response) {
        return ReplyClass::ApiError(message);
    }

    let validation = validate_response(&response, expected_features);
    if validation.is_valid {
        ReplyClass::Valid {
            response,
            feature_count: validation.feature_count,
        }
    } else {
        ReplyClass::Invalid {
            response,
            reason: validation.message,
        }
    }
}

/// Drive one frame through the retry state machine.
///
/// Each attempt either accepts, sleeps and retries, or gives up. Rate-limit
/// waits are counted separately and only spend an attempt once
/// `max_rate_limit_waits` is exhausted. No sleep follows the final attempt.
pub async fn rate_frame(
    client: &dyn RatingClient,
    request: &ChatRequest,
    expected_features: usize,
    retry: &RetryConfig,
    frame_label: &str,
) -> FrameOutcome {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    let mut rate_limit_waits = 0;
    let mut last_invalid: Option<(Value, String)> = None;
    let mut last_reason = String::from("No attempts made");

    while attempt < max_attempts {
        let class = match client.send(request).await {
            Ok(reply) => classify_reply(&reply, expected_features, retry),
            Err(e) => ReplyClass::Transient(format!("Request failed: {:#}", e)),
        };

        match class {
            ReplyClass::Valid {
                response,
                feature_count,
            } => {
                debug!("✅ {} rated with {} features", frame_label, feature_count);
                return FrameOutcome::Accepted {
                    response,
                    feature_count,
                };
            }
            ReplyClass::RateLimited { wait, message } if rate_limit_waits < retry.max_rate_limit_waits => {
                rate_limit_waits += 1;
                warn!(
                    "⏳ Rate limit on {}, waiting {:.1}s ({}/{}): {}",
                    frame_label,
                    wait.as_secs_f64(),
                    rate_limit_waits,
                    retry.max_rate_limit_waits,
                    message
                );
                tokio::time::sleep(wait).await;
                continue;
            }
            ReplyClass::RateLimited { message, .. } | ReplyClass::ApiError(message) => {
                attempt += 1;
                error!(
                    "❌ API error on {} (attempt {}/{}): {}",
                    frame_label, attempt, max_attempts, message
                );
                last_reason = format!("API Error: {}", message);
            }
            ReplyClass::Transient(reason) => {
                attempt += 1;
                warn!(
                    "⚠️  {} on {} (attempt {}/{})",
                    reason, frame_label, attempt, max_attempts
                );
                last_reason = reason;
            }
            ReplyClass::Invalid { response, reason } => {
                attempt += 1;
                warn!(
                    "⚠️  Invalid response for {} (attempt {}/{}): {}",
                    frame_label, attempt, max_attempts, reason
                );
                last_reason = reason.clone();
                last_invalid = Some((response, reason));
            }
        }

        if attempt < max_attempts {
            info!("🔄 Retrying {} in {:.1}s", frame_label, retry.retry_delay().as_secs_f64());
            tokio::time::sleep(retry.retry_delay()).await;
        }
    }

    match last_invalid {
        Some((response, reason)) => {
            warn!(
                "💾 Keeping invalid response for {} after {} attempts: {}",
                frame_label, max_attempts, reason
            );
            FrameOutcome::Invalid { response, reason }
        }
        None => {
            error!("🚫 Giving up on {} after {} attempts", frame_label, max_attempts);
            FrameOutcome::Abandoned { reason: last_reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::RUBRIC;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replies scripted in order; `None` is a transport failure
    struct ScriptedClient {
        replies: Mutex<VecDeque<Option<HttpReply>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Option<HttpReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RatingClient for ScriptedClient {
        async fn send(&self, _request: &ChatRequest) -> Result<HttpReply> {
            *self.calls.lock().unwrap() += 1;
            match self.replies.lock().unwrap().pop_front() {
                Some(Some(reply)) => Ok(reply),
                Some(None) => Err(anyhow!("connection reset")),
                None => panic!("script exhausted"),
            }
        }
    }

    fn completion(lines: usize, finish_reason: &str) -> HttpReply {
        let content = RUBRIC
            .iter()
            .take(lines)
            .map(|label| format!("{}: 50", label))
            .collect::<Vec<_>>()
            .join("\n");
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": finish_reason}]
        });
        HttpReply::new(200, body.to_string())
    }

    fn rate_limited(message: &str) -> HttpReply {
        let body = json!({"error": {"message": message, "type": "tokens", "code": "rate_limit_exceeded"}});
        HttpReply::new(429, body.to_string())
    }

    fn api_error(message: &str) -> HttpReply {
        HttpReply::new(200, json!({"error": {"message": message, "type": "server_error"}}).to_string())
    }

    fn request() -> ChatRequest {
        ChatRequest::for_frame("gpt-4.1", 8192, "prompt", "data:".to_string(), &[])
    }

    #[test]
    fn test_parse_wait_hint() {
        assert_eq!(
            parse_wait_hint("Rate limit reached. Please try again in 1.5s. Visit ..."),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_wait_hint("Please try again in 250ms."),
            Some(Duration::from_millis(250))
        );
        assert_eq!(parse_wait_hint("slow down"), None);
    }

    #[test]
    fn test_oversized_wait_hint_is_capped() {
        let message = "Rate limit reached. Please try again in 99999999999999999999s.";
        assert_eq!(parse_wait_hint(message), Some(MAX_WAIT_HINT));
        assert_eq!(parse_wait_hint("try again in 3600s"), Some(MAX_WAIT_HINT));

        let retry = RetryConfig::default();
        assert!(matches!(
            classify_reply(&rate_limited(message), 138, &retry),
            ReplyClass::RateLimited { wait, .. } if wait == MAX_WAIT_HINT + Duration::from_secs(1)
        ));

        let saturating = RetryConfig {
            rate_limit_buffer_secs: 1e300,
            ..RetryConfig::default()
        };
        assert!(matches!(
            classify_reply(&rate_limited(message), 138, &saturating),
            ReplyClass::RateLimited { wait, .. } if wait == Duration::MAX
        ));
    }

    #[test]
    fn test_classify_replies() {
        let retry = RetryConfig::default();

        assert!(matches!(
            classify_reply(&HttpReply::new(200, "  "), 138, &retry),
            ReplyClass::Transient(reason) if reason == "Empty response"
        ));
        assert!(matches!(
            classify_reply(&HttpReply::new(502, "Bad gateway"), 138, &retry),
            ReplyClass::Transient(reason) if reason.starts_with("HTTP 502")
        ));
        assert!(matches!(
            classify_reply(&HttpReply::new(200, "{not json"), 138, &retry),
            ReplyClass::Transient(reason) if reason.starts_with("JSON parse error")
        ));
        assert_eq!(
            classify_reply(&rate_limited("Please try again in 2s."), 138, &retry),
            ReplyClass::RateLimited {
                wait: Duration::from_secs(3),
                message: "Please try again in 2s.".to_string()
            }
        );
        assert!(matches!(
            classify_reply(&rate_limited("Too many tokens"), 138, &retry),
            ReplyClass::RateLimited { wait, .. } if wait == Duration::from_secs(11)
        ));
        assert_eq!(
            classify_reply(&api_error("boom"), 138, &retry),
            ReplyClass::ApiError("boom".to_string())
        );
        assert!(matches!(
            classify_reply(&completion(137, "stop"), 138, &retry),
            ReplyClass::Invalid { reason, .. } if reason == "Incomplete response: 137/138 features"
        ));
        assert!(matches!(
            classify_reply(&completion(138, "stop"), 138, &retry),
            ReplyClass::Valid { feature_count: 138, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_does_not_sleep() {
        let client = ScriptedClient::new(vec![Some(completion(138, "stop"))]);
        let start = Instant::now();

        let outcome = rate_frame(&client, &request(), 138, &RetryConfig::default(), "v/1").await;

        assert!(matches!(outcome, FrameOutcome::Accepted { feature_count: 138, .. }));
        assert_eq!(client.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let client = ScriptedClient::new(vec![
            None,
            Some(HttpReply::new(200, "")),
            Some(completion(138, "stop")),
        ]);
        let start = Instant::now();

        let outcome = rate_frame(&client, &request(), 138, &RetryConfig::default(), "v/1").await;

        assert!(matches!(outcome, FrameOutcome::Accepted { .. }));
        assert_eq!(client.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_invalid_response_is_kept() {
        let client = ScriptedClient::new(vec![
            Some(completion(100, "stop")),
            Some(completion(120, "stop")),
            Some(completion(138, "length")),
        ]);
        let start = Instant::now();

        let outcome = rate_frame(&client, &request(), 138, &RetryConfig::default(), "v/1").await;

        match outcome {
            FrameOutcome::Invalid { reason, response } => {
                assert_eq!(reason, "Response truncated (hit token limit)");
                assert_eq!(response["choices"][0]["finish_reason"], "length");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(client.calls(), 3);
        // two retry delays, none after the last attempt
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_errors_abandon_frame() {
        let client = ScriptedClient::new(vec![
            Some(api_error("overloaded")),
            Some(api_error("overloaded")),
            Some(api_error("still overloaded")),
        ]);

        let outcome = rate_frame(&client, &request(), 138, &RetryConfig::default(), "v/1").await;

        assert_eq!(
            outcome,
            FrameOutcome::Abandoned {
                reason: "API Error: still overloaded".to_string()
            }
        );
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_do_not_spend_attempts() {
        let client = ScriptedClient::new(vec![
            Some(rate_limited("Please try again in 1.5s.")),
            Some(rate_limited("Please try again in 500ms.")),
            Some(completion(138, "stop")),
        ]);
        let start = Instant::now();

        let retry = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        let outcome = rate_frame(&client, &request(), 138, &retry, "v/1").await;

        assert!(matches!(outcome, FrameOutcome::Accepted { .. }));
        assert_eq!(client.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(2500 + 1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_are_bounded() {
        let retry = RetryConfig {
            max_attempts: 2,
            max_rate_limit_waits: 2,
            ..RetryConfig::default()
        };
        let client = ScriptedClient::new((0..4).map(|_| Some(rate_limited("rate limit"))).collect());

        let outcome = rate_frame(&client, &request(), 138, &retry, "v/1").await;

        assert!(matches!(outcome, FrameOutcome::Abandoned { .. }));
        // two free waits, then two attempts spent
        assert_eq!(client.calls(), 4);
    }
}
