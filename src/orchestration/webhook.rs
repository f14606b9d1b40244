//! Best-effort completion webhook delivery.
//!
//! When a case reaches a terminal state, a JSON notice is POSTed to the
//! configured URL with bounded retries. Delivery is never guaranteed and
//! never blocks case finalization; exhausted deliveries are logged and
//! dropped.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Case;
use crate::state_machine::CaseState;

/// Payload POSTed to the registered completion URL
#[derive(Debug, Clone, Serialize)]
pub struct CompletionNotice {
    pub case_id: Uuid,
    pub final_state: CaseState,
    pub summary: String,
}

impl CompletionNotice {
    pub fn for_case(case: &Case) -> Self {
        Self {
            case_id: case.case_id,
            final_state: case.current_state,
            summary: format!(
                "{} case reached {} after {} transitions in {:.1}s",
                case.case_type,
                case.current_state,
                case.history.len(),
                case.age_seconds(),
            ),
        }
    }
}

/// Bounded-retry webhook client for terminal-state notifications
#[derive(Debug, Clone)]
pub struct CompletionWebhook {
    client: reqwest::Client,
    url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CompletionWebhook {
    pub fn new(url: String, max_attempts: u32, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            max_attempts: max_attempts.max(1),
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Deliver a terminal-state notice, retrying transient failures up to
    /// the configured attempt budget.
    pub async fn deliver(&self, case: &Case) {
        let notice = CompletionNotice::for_case(case);

        for attempt in 1..=self.max_attempts {
            match self.client.post(&self.url).json(&notice).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        case_id = %notice.case_id,
                        final_state = %notice.final_state,
                        attempt = attempt,
                        "📬 Completion webhook delivered"
                    );
                    return;
                }
                Ok(response) => {
                    warn!(
                        case_id = %notice.case_id,
                        status = %response.status(),
                        attempt = attempt,
                        "Completion webhook rejected"
                    );
                }
                Err(err) => {
                    warn!(
                        case_id = %notice.case_id,
                        error = %err,
                        attempt = attempt,
                        "Completion webhook delivery failed"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }

        warn!(
            case_id = %notice.case_id,
            attempts = self.max_attempts,
            "📭 Completion webhook dropped after exhausting retries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CasePriority, CaseType};
    use serde_json::json;

    #[test]
    fn test_notice_summarizes_case() {
        let case = Case::new(CaseType::CiFailure, json!({"log": "x"}), CasePriority::High);
        let notice = CompletionNotice::for_case(&case);
        assert_eq!(notice.case_id, case.case_id);
        assert_eq!(notice.final_state, CaseState::Pending);
        assert!(notice.summary.contains("ci_failure"));
    }

    #[tokio::test]
    async fn test_delivery_to_unreachable_url_exhausts_quietly() {
        let webhook = CompletionWebhook::new(
            // Reserved TEST-NET-1 address; connection fails fast.
            "http://192.0.2.1:9/hook".to_string(),
            1,
            Duration::from_millis(100),
        );
        let case = Case::new(CaseType::SpamIncident, json!({}), CasePriority::Normal);
        // Must not panic or hang beyond the bounded attempts.
        webhook.deliver(&case).await;
    }
}
