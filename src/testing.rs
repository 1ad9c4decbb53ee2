//! Test doubles shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::notify::{Notifier, NotifyOutcome, Signup};
use crate::store::MemStore;
use crate::{Error, Result};

pub const ENC_KEY: &str = "01234567890123456789012345678901";

pub fn config() -> Config {
    Config {
        version: "test".into(),
        ssl: false,
        host: "localhost".into(),
        port: 3030,
        log_format: "json".into(),
        log_level: "INFO".into(),
        db_url: "memory".into(),
        enc_key: ENC_KEY.into(),
        spotify_oauth_client_id: "oauth-id".into(),
        spotify_oauth_client_secret: "oauth-secret".into(),
        spotify_catalog_client_id: "catalog-id".into(),
        spotify_catalog_client_secret: "catalog-secret".into(),
        spotify_accounts_url: "http://accounts.test".into(),
        spotify_api_url: "http://api.test/v1".into(),
        spotify_redirect_uri: "http://localhost:3030/callback".into(),
        frontend_redirect_uri: "http://localhost:3000".into(),
        allowed_origins: vec!["http://localhost:3000".into()],
        allowed_emails: vec!["test@user.com".into()],
        session_access_seconds: 300,
        session_refresh_seconds: 604800,
        upstream_timeout_seconds: 10,
        upstream_max_attempts: 3,
        upstream_backoff_millis: 0,
        signup_webhook_url: None,
        graphiql: false,
    }
}

/// Scripted `Transport`. Responses are queued per url fragment and
/// handed out in order; the longest fragment contained in the request
/// url wins.
#[derive(Default)]
pub struct FakeTransport {
    scripted: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    sent: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, fragment: &str, status: u16, body: &str) {
        self.scripted
            .lock()
            .unwrap()
            .entry(fragment.to_string())
            .or_default()
            .push_back(HttpResponse {
                status,
                body: body.to_string(),
            });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, req: &HttpRequest) -> Result<HttpResponse> {
        self.sent.lock().unwrap().push(req.clone());
        let mut scripted = self.scripted.lock().unwrap();
        let fragment = scripted
            .iter()
            .filter(|(k, q)| req.url.contains(k.as_str()) && !q.is_empty())
            .map(|(k, _)| k.clone())
            .max_by_key(|k| k.len());
        fragment
            .and_then(|k| scripted.get_mut(&k).and_then(|q| q.pop_front()))
            .ok_or_else(|| Error::Http(format!("no scripted response for {}", req.url)))
    }
}

/// Records signups and answers with a fixed outcome
pub struct RecordingNotifier {
    outcome: NotifyOutcome,
    pub seen: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new(outcome: NotifyOutcome) -> Self {
        Self {
            outcome,
            seen: Mutex::new(vec![]),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn signup(&self, signup: &Signup<'_>) -> NotifyOutcome {
        self.seen.lock().unwrap().push(signup.username.to_string());
        self.outcome.clone()
    }
}

pub struct TestApp {
    pub ctx: Context,
    pub store: Arc<MemStore>,
    pub http: Arc<FakeTransport>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn app() -> TestApp {
    app_with(config(), NotifyOutcome::Sent)
}

pub fn app_with(config: Config, outcome: NotifyOutcome) -> TestApp {
    let store = Arc::new(MemStore::new());
    let http = Arc::new(FakeTransport::new());
    let notifier = Arc::new(RecordingNotifier::new(outcome));
    let ctx = Context::new(config, store.clone(), http.clone(), notifier.clone())
        .expect("test context");
    TestApp {
        ctx,
        store,
        http,
        notifier,
    }
}
