/*!
Error kinds shared by every layer
*/

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input from the caller
    #[error("{0}")]
    Validation(String),

    /// The resource already exists
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials. The message never says which part was wrong.
    #[error("{0}")]
    Auth(String),

    /// Malformed OAuth provider callback
    #[error("oauth callback error: {0}")]
    Callback(String),

    /// The provider answered with a non-2xx status
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The provider could not be reached at all
    #[error("http error: {0}")]
    Http(String),

    #[error("db error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Errors that a mutation reports as `{success: false, details}`
    /// instead of raising.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Conflict(_) | Error::Auth(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build an `Error::Internal` from a format string
#[macro_export]
macro_rules! se {
    ($($arg:tt)*) => {{
        $crate::error::Error::Internal(format!($($arg)*))
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_kinds() {
        assert!(Error::Validation("Input malformed !".into()).is_user_facing());
        assert!(Error::Conflict("User already exist !".into()).is_user_facing());
        assert!(Error::Auth("nope".into()).is_user_facing());
        assert!(!Error::Callback("no code".into()).is_user_facing());
        assert!(!Error::Upstream {
            status: 500,
            body: "boom".into()
        }
        .is_user_facing());
    }

    #[test]
    fn upstream_display_carries_status_and_body() {
        let e = Error::Upstream {
            status: 401,
            body: "{\"error\":\"invalid_client\"}".into(),
        };
        let s = e.to_string();
        assert!(s.contains("401"));
        assert!(s.contains("invalid_client"));
    }

    #[test]
    fn se_macro_formats() {
        let e = se!("bad thing {}", 42);
        assert_eq!(e.to_string(), "bad thing 42");
    }
}
