use std::{env, fs};

use crate::{Error, Result, LOG};

const MAX_UPSTREAM_ATTEMPTS: u32 = 10;
// ten years
const MAX_SESSION_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

pub fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(k: &str, default: &str) -> Result<T> {
    env_or(k, default)
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid {}", k.to_lowercase())))
}

/// Split a comma separated env value, dropping blanks
fn env_list(k: &str, default: &str) -> Vec<String> {
    env_or(k, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub port: u16,
    pub log_format: String,
    pub log_level: String,
    pub db_url: String,
    pub enc_key: String,

    // used for the authorization-code and refresh grants on behalf of a user
    pub spotify_oauth_client_id: String,
    pub spotify_oauth_client_secret: String,
    // used for the client-credentials grant when reading public catalog data
    pub spotify_catalog_client_id: String,
    pub spotify_catalog_client_secret: String,
    pub spotify_accounts_url: String,
    pub spotify_api_url: String,
    pub spotify_redirect_uri: String,
    pub frontend_redirect_uri: String,

    pub allowed_origins: Vec<String>,
    // emails whose accounts are accepted at signup
    pub allowed_emails: Vec<String>,

    pub session_access_seconds: i64,
    pub session_refresh_seconds: i64,

    pub upstream_timeout_seconds: u64,
    pub upstream_max_attempts: u32,
    pub upstream_backoff_millis: u64,

    pub signup_webhook_url: Option<String>,
    pub graphiql: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let version = fs::read_to_string("commit_hash.txt")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let config = Self {
            version,
            ssl: env_or("SSL", "false") == "true",
            host: env_or("HOST", "localhost"),
            port: env_parse("PORT", "3030")?,
            log_format: env_or("LOG_FORMAT", "json")
                .to_lowercase()
                .trim()
                .to_string(),
            log_level: env_or("LOG_LEVEL", "INFO"),
            db_url: env_or("DATABASE_URL", "memory"),
            enc_key: env_or("ENC_KEY", "01234567890123456789012345678901"),
            spotify_oauth_client_id: env_or("SPOTIFY_OAUTH_CLIENT_ID", "fake"),
            spotify_oauth_client_secret: env_or("SPOTIFY_OAUTH_CLIENT_SECRET", "fake"),
            spotify_catalog_client_id: env_or("SPOTIFY_CATALOG_CLIENT_ID", "fake"),
            spotify_catalog_client_secret: env_or("SPOTIFY_CATALOG_CLIENT_SECRET", "fake"),
            spotify_accounts_url: env_or("SPOTIFY_ACCOUNTS_URL", "https://accounts.spotify.com"),
            spotify_api_url: env_or("SPOTIFY_API_URL", "https://api.spotify.com/v1"),
            spotify_redirect_uri: env_or(
                "SPOTIFY_REDIRECT_URI",
                "http://localhost:3030/callback",
            ),
            frontend_redirect_uri: env_or("FRONTEND_REDIRECT_URI", "http://localhost:3000"),
            allowed_origins: env_list(
                "ALLOWED_ORIGINS",
                "http://localhost:3000,http://127.0.0.1:3000",
            ),
            allowed_emails: env_list("ALLOWED_EMAILS", "")
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            session_access_seconds: env_parse("SESSION_ACCESS_SECONDS", "300")?,
            session_refresh_seconds: env_parse("SESSION_REFRESH_SECONDS", "604800")?,
            upstream_timeout_seconds: env_parse("UPSTREAM_TIMEOUT_SECONDS", "10")?,
            upstream_max_attempts: env_parse("UPSTREAM_MAX_ATTEMPTS", "3")?,
            upstream_backoff_millis: env_parse("UPSTREAM_BACKOFF_MILLIS", "250")?,
            signup_webhook_url: env::var("SIGNUP_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            graphiql: env_or("GRAPHIQL", "false") == "true",
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.enc_key.len() != 32 {
            return Err(Error::Config("enc_key must be 32 bytes".into()));
        }
        if !(1..=MAX_UPSTREAM_ATTEMPTS).contains(&self.upstream_max_attempts) {
            return Err(Error::Config(format!(
                "upstream_max_attempts must be between 1 and {}",
                MAX_UPSTREAM_ATTEMPTS
            )));
        }
        for (name, seconds) in [
            ("session_access_seconds", self.session_access_seconds),
            ("session_refresh_seconds", self.session_refresh_seconds),
        ] {
            if !(0..=MAX_SESSION_SECONDS).contains(&seconds) {
                return Err(Error::Config(format!(
                    "{} must be between 0 and {}",
                    name, MAX_SESSION_SECONDS
                )));
            }
        }
        Ok(())
    }

    pub fn initialize(&self) -> Result<()> {
        slog::info!(
            LOG, "initialized config";
            "version" => &self.version,
            "ssl" => &self.ssl,
            "host" => &self.host,
            "port" => &self.port,
            "log_format" => &self.log_format,
            "log_level" => &self.log_level,
            "store" => if self.uses_memory_store() { "memory" } else { "postgres" },
            "allowed_emails" => self.allowed_emails.len(),
            "signup_webhook" => self.signup_webhook_url.is_some(),
        );
        Ok(())
    }

    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.db_url == "memory"
    }

    /// Whether a signup email is on the acceptance allow-list
    pub fn is_allowed_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        !email.is_empty() && self.allowed_emails.iter().any(|e| *e == email)
    }

    pub fn spotify_authorize_url(&self) -> String {
        format!("{}/authorize", self.spotify_accounts_url.trim_end_matches('/'))
    }

    pub fn spotify_token_url(&self) -> String {
        format!("{}/api/token", self.spotify_accounts_url.trim_end_matches('/'))
    }

    pub fn spotify_api(&self, path: &str) -> String {
        format!("{}{}", self.spotify_api_url.trim_end_matches('/'), path)
    }
}
