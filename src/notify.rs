/*!
Admin notification when someone signs up.

Notifying is a side channel: implementations never return an error, they
report what happened as a `NotifyOutcome` and the caller logs it.
*/
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::http::{self, HttpRequest, RetryPolicy, Transport};
use crate::LOG;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Signup<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub accepted: bool,
}

impl<'a> Signup<'a> {
    pub fn message(&self) -> String {
        let status = if self.accepted {
            "already on the allow-list"
        } else {
            "waiting for approval"
        };
        format!(
            "New subscription to Müsik\nUsername: {}\nUser email: {}\nAccount is {}.",
            self.username, self.email, status
        )
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn signup(&self, signup: &Signup<'_>) -> NotifyOutcome;
}

/// Used when no webhook is configured
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn signup(&self, signup: &Signup<'_>) -> NotifyOutcome {
        slog::info!(
            LOG, "new signup";
            "username" => signup.username,
            "accepted" => signup.accepted,
        );
        NotifyOutcome::Skipped("no signup webhook configured".into())
    }
}

/// Posts `{"content": ...}` to a chat webhook
pub struct WebhookNotifier {
    url: String,
    http: Arc<dyn Transport>,
}

impl WebhookNotifier {
    pub fn new(url: String, http: Arc<dyn Transport>) -> Self {
        Self { url, http }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn signup(&self, signup: &Signup<'_>) -> NotifyOutcome {
        let req = HttpRequest::post_json(
            self.url.clone(),
            serde_json::json!({ "content": signup.message() }),
        );
        // one shot, a slow webhook shouldn't hold up a signup
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: Duration::from_millis(0),
        };
        match http::execute(self.http.as_ref(), policy, &req).await {
            Ok(_) => NotifyOutcome::Sent,
            Err(e) => NotifyOutcome::Failed(e.to_string()),
        }
    }
}

pub fn from_config(config: &Config, http: Arc<dyn Transport>) -> Arc<dyn Notifier> {
    match &config.signup_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), http)),
        None => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    fn signup() -> Signup<'static> {
        Signup {
            username: "foo",
            email: "foo@bar.com",
            accepted: false,
        }
    }

    #[test]
    fn message_names_the_user() {
        let m = signup().message();
        assert!(m.contains("foo"));
        assert!(m.contains("foo@bar.com"));
        assert!(m.contains("waiting for approval"));
    }

    #[async_std::test]
    async fn log_notifier_skips() {
        match LogNotifier.signup(&signup()).await {
            NotifyOutcome::Skipped(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[async_std::test]
    async fn webhook_reports_sent_and_failed() {
        let fake = Arc::new(FakeTransport::new());
        fake.respond("/hooks/ok", 204, "");
        fake.respond("/hooks/down", 500, "oops");

        let ok = WebhookNotifier::new("http://chat/hooks/ok".into(), fake.clone());
        assert_eq!(ok.signup(&signup()).await, NotifyOutcome::Sent);
        let sent = fake.requests();
        let body = sent[0].json.as_ref().unwrap();
        assert!(body["content"].as_str().unwrap().contains("foo@bar.com"));

        let down = WebhookNotifier::new("http://chat/hooks/down".into(), fake.clone());
        match down.signup(&signup()).await {
            NotifyOutcome::Failed(msg) => assert!(msg.contains("500")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
