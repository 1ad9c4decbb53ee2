/*!
Signup, login and app sessions.

A session is an access/refresh token pair sharing a session id. The
opaque tokens are handed to the client once; only their hmac is stored.
*/
use chrono::{DateTime, Duration, Utc};

use crate::context::Context;
use crate::crypto;
use crate::models::{Account, NewAccount, NewAuthToken, TokenKind};
use crate::notify::{NotifyOutcome, Signup};
use crate::{Error, Result, LOG};

const MALFORMED: &str = "Input malformed !";
const BAD_CREDENTIALS: &str = "Error in either password or username !";

/// Tokens handed to a client after signup, login or refresh
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub token: String,
    pub refresh_token: String,
}

/// A successful account operation
#[derive(Debug, Clone)]
pub struct Granted {
    pub account: Account,
    pub session: Session,
    pub details: String,
}

/// The account behind a presented access token
#[derive(Debug, Clone)]
pub struct Viewer {
    pub account: Account,
    pub session_id: String,
}

fn present(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn session_expiry(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>> {
    Duration::try_seconds(seconds)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| Error::Config(format!("invalid session lifetime {}", seconds)))
}

async fn issue_session(ctx: &Context, account: &Account) -> Result<Session> {
    let now = Utc::now();
    let access_expires = session_expiry(now, ctx.config.session_access_seconds)?;
    let refresh_expires = session_expiry(now, ctx.config.session_refresh_seconds)?;
    let session = Session {
        session_id: uuid::Uuid::new_v4().simple().to_string(),
        token: crypto::new_session_token(&account.username)?,
        refresh_token: crypto::new_session_token(&account.username)?,
    };
    let pair = [
        NewAuthToken {
            hash: ctx.sealer.sign(&session.token),
            account_id: account.id,
            session_id: session.session_id.clone(),
            kind: TokenKind::Access,
            expires: access_expires,
        },
        NewAuthToken {
            hash: ctx.sealer.sign(&session.refresh_token),
            account_id: account.id,
            session_id: session.session_id.clone(),
            kind: TokenKind::Refresh,
            expires: refresh_expires,
        },
    ];
    ctx.store.insert_auth_tokens(&pair).await?;
    Ok(session)
}

/// Create an account and sign it in.
///
/// Accounts whose email is on the allow-list are accepted right away.
/// The admin is told about every signup, a failed notification is
/// logged and otherwise ignored.
pub async fn register(
    ctx: &Context,
    username: Option<&str>,
    password: Option<&str>,
    email: Option<&str>,
) -> Result<Granted> {
    let (username, password) = match (present(username), password.filter(|p| !p.is_empty())) {
        (Some(u), Some(p)) => (u, p),
        _ => return Err(Error::Validation(MALFORMED.into())),
    };
    let email = email.map(str::trim).unwrap_or("");
    if ctx.store.account_by_username(username).await?.is_some() {
        return Err(Error::Conflict("User already exist !".into()));
    }
    let accepted = ctx.config.is_allowed_email(email);
    let account = ctx
        .store
        .create_account(NewAccount {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: crypto::hash_password(password)?,
            accepted_account: accepted,
        })
        .await?;
    let session = issue_session(ctx, &account).await?;

    let outcome = ctx
        .notifier
        .signup(&Signup {
            username: &account.username,
            email: &account.email,
            accepted,
        })
        .await;
    match &outcome {
        NotifyOutcome::Sent => {
            slog::info!(LOG, "signup notification sent"; "account_id" => account.id)
        }
        NotifyOutcome::Skipped(reason) => slog::info!(
            LOG, "signup notification skipped";
            "account_id" => account.id, "reason" => reason,
        ),
        NotifyOutcome::Failed(reason) => slog::error!(
            LOG, "signup notification failed, continuing";
            "account_id" => account.id, "reason" => reason,
        ),
    }

    slog::info!(
        LOG, "registered account";
        "account_id" => account.id,
        "accepted" => accepted,
    );
    Ok(Granted {
        details: format!("User {} created successfully !", account.username),
        account,
        session,
    })
}

/// Check credentials and start a new session. Unknown usernames and bad
/// passwords fail the same way.
pub async fn login(ctx: &Context, username: Option<&str>, password: Option<&str>) -> Result<Granted> {
    let (username, password) = match (present(username), password) {
        (Some(u), Some(p)) => (u, p),
        _ => return Err(Error::Auth(BAD_CREDENTIALS.into())),
    };
    let account = ctx.store.account_by_username(username).await?;
    let stored = crypto::stored_or_dummy(account.as_ref().map(|a| a.password_hash.as_str()));
    let verified = crypto::verify_password(password, stored);
    let account = match account {
        Some(a) if verified => a,
        _ => {
            slog::info!(LOG, "failed login attempt");
            return Err(Error::Auth(BAD_CREDENTIALS.into()));
        }
    };
    let session = issue_session(ctx, &account).await?;
    slog::info!(LOG, "logged in"; "account_id" => account.id);
    Ok(Granted {
        details: format!("User {} logged in !", account.username),
        account,
        session,
    })
}

/// Drop the viewer's session, if there is one
pub async fn logout(ctx: &Context, viewer: Option<&Viewer>) -> Result<String> {
    if let Some(viewer) = viewer {
        let removed = ctx.store.delete_session(&viewer.session_id).await?;
        slog::info!(
            LOG, "logged out";
            "account_id" => viewer.account.id,
            "tokens_removed" => removed,
        );
    }
    Ok("User logged out!".into())
}

/// Trade a refresh token for a new session. The old session is revoked.
pub async fn refresh_session(ctx: &Context, refresh_token: &str) -> Result<Granted> {
    let invalid = || Error::Auth("Invalid refresh token !".into());
    let stored = ctx
        .store
        .auth_token(&ctx.sealer.sign(refresh_token), TokenKind::Refresh)
        .await?
        .ok_or_else(invalid)?;
    let account = ctx
        .store
        .account_by_id(stored.account_id)
        .await?
        .ok_or_else(invalid)?;
    ctx.store.delete_session(&stored.session_id).await?;
    let session = issue_session(ctx, &account).await?;
    slog::info!(LOG, "rotated session"; "account_id" => account.id);
    Ok(Granted {
        details: format!("Session refreshed for {} !", account.username),
        account,
        session,
    })
}

/// Resolve a presented access token. Expired tokens of the account are
/// pruned on the way.
pub async fn authenticate(ctx: &Context, token: &str) -> Result<Option<Viewer>> {
    let stored = match ctx
        .store
        .auth_token(&ctx.sealer.sign(token), TokenKind::Access)
        .await?
    {
        Some(t) => t,
        None => return Ok(None),
    };
    let account = match ctx.store.account_by_id(stored.account_id).await? {
        Some(a) => a,
        None => return Ok(None),
    };
    if let Err(e) = ctx.store.delete_expired_auth_tokens(account.id).await {
        slog::error!(
            LOG, "error deleting expired auth tokens, continuing";
            "account_id" => account.id, "error" => %e,
        );
    }
    Ok(Some(Viewer {
        account,
        session_id: stored.session_id,
    }))
}

/// Pull the token out of an `Authorization: Bearer <token>` (or
/// `JWT <token>`) header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?.trim();
    let known = scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("jwt");
    if known && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}
