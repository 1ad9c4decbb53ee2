/*!
Spotify OAuth2: the authorization-code flow on behalf of an account,
refresh of expired access tokens, and the client-credentials token used
for public catalog reads.
*/
use chrono::{DateTime, Duration, Utc};

use crate::context::Context;
use crate::http::{self, HttpRequest, RetryPolicy};
use crate::models::{SealedTokens, PROVIDER_SPOTIFY};
use crate::{Error, Result, LOG};

pub const SCOPES: &str = "user-library-read user-read-private playlist-read-private user-read-email";

/// Token endpoint response
#[derive(serde::Deserialize, Debug)]
pub struct ProviderTokens {
    pub access_token: String,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
}

/// Query parameters of the provider redirect back to `/callback`
#[derive(serde::Deserialize, Debug, Default, Clone)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// An access token is only valid while `now < expires_at`
pub fn is_expired(expires_at: DateTime<Utc>) -> bool {
    is_expired_at(expires_at, Utc::now())
}

pub fn is_expired_at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - now <= Duration::zero()
}

/// `now + seconds`, `None` when that is out of range
pub fn expiry_after(seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds.max(0)).and_then(|d| Utc::now().checked_add_signed(d))
}

fn expires_at_from(expires_in: i64) -> Result<DateTime<Utc>> {
    expiry_after(expires_in).ok_or_else(|| Error::Upstream {
        status: 200,
        body: format!("invalid expires_in {}", expires_in),
    })
}

/// The provider authorization url for `user_id`. The account id is
/// sent as `state` and comes back on the callback.
pub fn authorize_url(ctx: &Context, user_id: i64) -> Result<String> {
    let state = user_id.to_string();
    let url = surf::Url::parse_with_params(
        &ctx.config.spotify_authorize_url(),
        &[
            ("response_type", "code"),
            ("scope", SCOPES),
            ("client_id", ctx.config.spotify_oauth_client_id.as_str()),
            ("redirect_uri", ctx.config.spotify_redirect_uri.as_str()),
            ("state", state.as_str()),
        ],
    )
    .map_err(|e| Error::Config(format!("invalid spotify authorize url {}", e)))?;
    Ok(url.to_string())
}

/// Build the authorization url and make sure the provider accepts it
pub async fn build_authorize_url(ctx: &Context, user_id: i64) -> Result<String> {
    let url = authorize_url(ctx, user_id)?;
    // the authorize endpoint answers with a login page or a redirect
    let resp = ctx.http.send(&HttpRequest::get(url.clone())).await?;
    if resp.status >= 400 {
        slog::error!(
            LOG, "provider rejected authorization request";
            "account_id" => user_id,
            "status" => resp.status,
        );
        return Err(Error::Upstream {
            status: resp.status,
            body: resp.body,
        });
    }
    Ok(url)
}

async fn token_request(
    ctx: &Context,
    policy: RetryPolicy,
    client_id: &str,
    client_secret: &str,
    form: &[(&str, &str)],
) -> Result<ProviderTokens> {
    let req = HttpRequest::post_form(ctx.config.spotify_token_url(), form)
        .basic(client_id, client_secret);
    http::execute_json(ctx.http.as_ref(), policy, &req).await
}

/// Handle the provider redirect after a user granted (or denied) access.
///
/// The `code` is exchanged for an access/refresh token pair which is
/// sealed and stored on the account named by `state`. Returns that
/// account's id.
pub async fn handle_callback(ctx: &Context, params: CallbackParams) -> Result<i64> {
    if let Some(error) = params.error {
        return Err(Error::Callback(format!(
            "provider returned error {:?}",
            error
        )));
    }

    let account_id = params
        .state
        .as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| Error::Callback("state is not an account id".into()))?;
    let account = ctx
        .store
        .account_by_id(account_id)
        .await?
        .ok_or_else(|| Error::Callback(format!("no account found for state {}", account_id)))?;

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::Callback("no authorization code provided".into()))?;

    // authorization codes are single use, never replay them
    let once = RetryPolicy {
        max_attempts: 1,
        ..ctx.retry_policy()
    };
    let tokens = token_request(
        ctx,
        once,
        &ctx.config.spotify_oauth_client_id,
        &ctx.config.spotify_oauth_client_secret,
        &[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", ctx.config.spotify_redirect_uri.as_str()),
        ],
    )
    .await?;
    let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| Error::Upstream {
        status: 200,
        body: "token response without refresh_token".into(),
    })?;

    let sealed = SealedTokens {
        access: ctx.sealer.seal(&tokens.access_token)?,
        refresh: ctx.sealer.seal(refresh_token)?,
        expires_at: expires_at_from(tokens.expires_in)?,
    };
    let credential = ctx
        .store
        .upsert_credential(account.id, PROVIDER_SPOTIFY, &sealed)
        .await?;
    slog::info!(
        LOG, "stored provider credentials";
        "account_id" => account.id,
        "expires_at" => credential.expires_at.to_rfc3339(),
        "scope" => tokens.scope.as_deref().unwrap_or(""),
    );
    Ok(account.id)
}

/// Trade a refresh token for a new access token and store it.
///
/// The stored refresh token is only replaced when the provider
/// hands out a new one.
pub async fn refresh_access_token(
    ctx: &Context,
    refresh_token: &str,
    user_id: i64,
) -> Result<String> {
    slog::info!(LOG, "refreshing access token"; "account_id" => user_id);
    let tokens = token_request(
        ctx,
        ctx.retry_policy(),
        &ctx.config.spotify_oauth_client_id,
        &ctx.config.spotify_oauth_client_secret,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ],
    )
    .await?;
    let access = ctx.sealer.seal(&tokens.access_token)?;
    let refresh = match &tokens.refresh_token {
        Some(r) => Some(ctx.sealer.seal(r)?),
        None => None,
    };
    ctx.store
        .update_access_token(
            user_id,
            PROVIDER_SPOTIFY,
            &access,
            expires_at_from(tokens.expires_in)?,
            refresh.as_ref(),
        )
        .await?;
    Ok(tokens.access_token)
}

/// The account's access token, refreshed first if it expired.
/// `None` when the account never went through the OAuth flow.
pub async fn valid_access_token(ctx: &Context, account_id: i64) -> Result<Option<String>> {
    let credential = match ctx.store.credential(account_id, PROVIDER_SPOTIFY).await? {
        Some(c) => c,
        None => return Ok(None),
    };
    if !is_expired(credential.expires_at) {
        return Ok(Some(ctx.sealer.open(&credential.access_enc())?));
    }
    let refresh_token = ctx.sealer.open(&credential.refresh_enc())?;
    let access = refresh_access_token(ctx, &refresh_token, account_id).await?;
    Ok(Some(access))
}

/// Client-credentials token for catalog reads, reused until shortly
/// before it expires.
pub async fn catalog_access_token(ctx: &Context) -> Result<String> {
    let mut lock = ctx.catalog_token.lock().await;
    if let Some(token) = lock.as_ref() {
        if !is_expired(token.expires_at) {
            return Ok(token.access_token.clone());
        }
    }
    slog::debug!(LOG, "fetching new catalog access token");
    let tokens = token_request(
        ctx,
        ctx.retry_policy(),
        &ctx.config.spotify_catalog_client_id,
        &ctx.config.spotify_catalog_client_secret,
        &[("grant_type", "client_credentials")],
    )
    .await?;
    let token = CatalogToken {
        access_token: tokens.access_token,
        expires_at: expires_at_from(tokens.expires_in.saturating_sub(60))?,
    };
    let access_token = token.access_token.clone();
    *lock = Some(token);
    Ok(access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAccount;
    use crate::store::Store;
    use crate::testing;

    const TOKENS: &str = r#"{
        "access_token": "BQD-access",
        "token_type": "Bearer",
        "scope": "user-read-private",
        "expires_in": 3600,
        "refresh_token": "AQB-refresh"
    }"#;

    async fn account(app: &testing::TestApp) -> i64 {
        app.ctx
            .store
            .create_account(NewAccount {
                username: "foo".into(),
                email: "foo@bar.com".into(),
                password_hash: "x".into(),
                accepted_account: true,
            })
            .await
            .unwrap()
            .id
    }

    fn params(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(String::from),
            state: state.map(String::from),
            error: error.map(String::from),
        }
    }

    #[test]
    fn expiry_boundary_is_expired() {
        let now = Utc::now();
        assert!(is_expired_at(now, now));
        assert!(is_expired_at(now - Duration::seconds(1), now));
        assert!(!is_expired_at(now + Duration::seconds(1), now));
    }

    #[test]
    fn authorize_url_carries_state_and_client() {
        let app = testing::app();
        let url = authorize_url(&app.ctx, 42).unwrap();
        let url = surf::Url::parse(&url).unwrap();
        assert_eq!(url.path(), "/authorize");
        let q: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(q["state"], "42");
        assert_eq!(q["response_type"], "code");
        assert_eq!(q["client_id"], "oauth-id");
        assert_eq!(q["scope"], SCOPES);
        assert_eq!(q["redirect_uri"], "http://localhost:3030/callback");
    }

    #[async_std::test]
    async fn authorize_url_rejected_by_provider() {
        let app = testing::app();
        app.http.respond("/authorize", 400, "INVALID_CLIENT");
        match build_authorize_url(&app.ctx, 1).await {
            Err(Error::Upstream { status, .. }) => assert_eq!(status, 400),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[async_std::test]
    async fn authorize_url_accepts_redirect() {
        let app = testing::app();
        app.http.respond("/authorize", 303, "");
        let url = build_authorize_url(&app.ctx, 7).await.unwrap();
        assert!(url.contains("state=7"));
    }

    #[async_std::test]
    async fn callback_error_param_wins() {
        let app = testing::app();
        match handle_callback(&app.ctx, params(Some("c"), Some("nope"), Some("access_denied"))).await {
            Err(Error::Callback(msg)) => assert!(msg.contains("access_denied")),
            other => panic!("expected callback error, got {:?}", other),
        }
        assert!(app.http.requests().is_empty());
    }

    #[async_std::test]
    async fn callback_unknown_state() {
        let app = testing::app();
        for state in &[None, Some("abc"), Some("999")] {
            match handle_callback(&app.ctx, params(Some("c"), *state, None)).await {
                Err(Error::Callback(_)) => {}
                other => panic!("expected callback error, got {:?}", other),
            }
        }
        assert!(app.http.requests().is_empty());
    }

    #[async_std::test]
    async fn callback_missing_code() {
        let app = testing::app();
        let id = account(&app).await;
        match handle_callback(&app.ctx, params(None, Some(&id.to_string()), None)).await {
            Err(Error::Callback(msg)) => assert!(msg.contains("code")),
            other => panic!("expected callback error, got {:?}", other),
        }
    }

    #[async_std::test]
    async fn callback_stores_sealed_tokens() {
        let app = testing::app();
        let id = account(&app).await;
        app.http.respond("/api/token", 200, TOKENS);

        let before = Utc::now();
        let got = handle_callback(&app.ctx, params(Some("the-code"), Some(&id.to_string()), None))
            .await
            .unwrap();
        assert_eq!(got, id);

        let reqs = app.http.requests();
        assert_eq!(reqs.len(), 1);
        // base64("oauth-id:oauth-secret")
        assert_eq!(
            reqs[0].authorization.as_deref(),
            Some("Basic b2F1dGgtaWQ6b2F1dGgtc2VjcmV0")
        );
        let form = reqs[0].form.clone().unwrap();
        assert!(form.contains(&("grant_type".into(), "authorization_code".into())));
        assert!(form.contains(&("code".into(), "the-code".into())));

        let c = app.store.credential(id, PROVIDER_SPOTIFY).await.unwrap().unwrap();
        assert_ne!(c.access_token, "BQD-access");
        assert_eq!(app.ctx.sealer.open(&c.access_enc()).unwrap(), "BQD-access");
        assert_eq!(app.ctx.sealer.open(&c.refresh_enc()).unwrap(), "AQB-refresh");
        let window = c.expires_at - before;
        assert!(window >= Duration::seconds(3599) && window <= Duration::seconds(3601));
    }

    #[async_std::test]
    async fn callback_rejects_out_of_range_expiry() {
        let app = testing::app();
        let id = account(&app).await;
        app.http.respond(
            "/api/token",
            200,
            r#"{"access_token":"a","refresh_token":"r","expires_in":9223372036854775807}"#,
        );
        match handle_callback(&app.ctx, params(Some("c"), Some(&id.to_string()), None)).await {
            Err(Error::Upstream { status, body }) => {
                assert_eq!(status, 200);
                assert!(body.contains("invalid expires_in"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
        assert!(app.store.credential(id, PROVIDER_SPOTIFY).await.unwrap().is_none());
        assert!(expiry_after(3600).is_some());
        assert!(expiry_after(i64::MAX).is_none());
    }

    #[async_std::test]
    async fn callback_token_failure_stores_nothing() {
        let app = testing::app();
        let id = account(&app).await;
        app.http.respond("/api/token", 400, r#"{"error":"invalid_grant"}"#);
        match handle_callback(&app.ctx, params(Some("c"), Some(&id.to_string()), None)).await {
            Err(Error::Upstream { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
        assert!(app.store.credential(id, PROVIDER_SPOTIFY).await.unwrap().is_none());
    }

    #[async_std::test]
    async fn refresh_keeps_refresh_token() {
        let app = testing::app();
        let id = account(&app).await;
        app.http.respond("/api/token", 200, TOKENS);
        handle_callback(&app.ctx, params(Some("c"), Some(&id.to_string()), None))
            .await
            .unwrap();

        app.http.respond(
            "/api/token",
            200,
            r#"{"access_token":"BQD-fresh","token_type":"Bearer","expires_in":3600}"#,
        );
        let access = refresh_access_token(&app.ctx, "AQB-refresh", id).await.unwrap();
        assert_eq!(access, "BQD-fresh");

        let c = app.store.credential(id, PROVIDER_SPOTIFY).await.unwrap().unwrap();
        assert_eq!(app.ctx.sealer.open(&c.access_enc()).unwrap(), "BQD-fresh");
        assert_eq!(app.ctx.sealer.open(&c.refresh_enc()).unwrap(), "AQB-refresh");

        let last = app.http.requests().pop().unwrap();
        let form = last.form.unwrap();
        assert!(form.contains(&("grant_type".into(), "refresh_token".into())));
    }

    #[async_std::test]
    async fn refresh_failure_is_upstream_error() {
        let app = testing::app();
        let id = account(&app).await;
        app.http.respond("/api/token", 400, "bad refresh");
        match refresh_access_token(&app.ctx, "r", id).await {
            Err(Error::Upstream { status, .. }) => assert_eq!(status, 400),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[async_std::test]
    async fn valid_access_token_refreshes_when_expired() {
        let app = testing::app();
        let id = account(&app).await;
        assert!(valid_access_token(&app.ctx, id).await.unwrap().is_none());

        app.http.respond("/api/token", 200, TOKENS);
        handle_callback(&app.ctx, params(Some("c"), Some(&id.to_string()), None))
            .await
            .unwrap();
        assert_eq!(
            valid_access_token(&app.ctx, id).await.unwrap().as_deref(),
            Some("BQD-access")
        );
        assert_eq!(app.http.requests().len(), 1);

        app.store.set_credential_expiry(id, Utc::now()).await;
        app.http.respond(
            "/api/token",
            200,
            r#"{"access_token":"BQD-fresh","expires_in":3600}"#,
        );
        assert_eq!(
            valid_access_token(&app.ctx, id).await.unwrap().as_deref(),
            Some("BQD-fresh")
        );
        assert_eq!(app.http.requests().len(), 2);
    }

    #[async_std::test]
    async fn catalog_token_is_cached() {
        let app = testing::app();
        app.http.respond(
            "/api/token",
            200,
            r#"{"access_token":"BQD-catalog","token_type":"Bearer","expires_in":3600}"#,
        );
        assert_eq!(catalog_access_token(&app.ctx).await.unwrap(), "BQD-catalog");
        assert_eq!(catalog_access_token(&app.ctx).await.unwrap(), "BQD-catalog");
        let reqs = app.http.requests();
        assert_eq!(reqs.len(), 1);
        // base64("catalog-id:catalog-secret")
        assert_eq!(
            reqs[0].authorization.as_deref(),
            Some("Basic Y2F0YWxvZy1pZDpjYXRhbG9nLXNlY3JldA==")
        );
    }
}
