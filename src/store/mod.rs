/*!
Persistence for accounts, provider credentials and session tokens.

`PgStore` is the production backend. `MemStore` is selected with
`DATABASE_URL=memory` for local runs and backs the test suite.
*/
use chrono::{DateTime, Utc};

use crate::crypto::Enc;
use crate::models::{
    Account, AuthToken, NewAccount, NewAuthToken, OAuthCredential, SealedTokens, TokenKind,
};
use crate::Result;

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Insert a new account. Fails with `Error::Conflict` when the
    /// username is taken, leaving the existing row untouched.
    async fn create_account(&self, new: NewAccount) -> Result<Account>;

    async fn account_by_id(&self, id: i64) -> Result<Option<Account>>;

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn accounts(&self) -> Result<Vec<Account>>;

    async fn credential(&self, account_id: i64, provider: &str)
        -> Result<Option<OAuthCredential>>;

    /// Replace all three credential fields for an account and provider
    async fn upsert_credential(
        &self,
        account_id: i64,
        provider: &str,
        tokens: &SealedTokens,
    ) -> Result<OAuthCredential>;

    /// Store a refreshed access token. The refresh token is only
    /// replaced when `refresh` is given.
    async fn update_access_token(
        &self,
        account_id: i64,
        provider: &str,
        access: &Enc,
        expires_at: DateTime<Utc>,
        refresh: Option<&Enc>,
    ) -> Result<()>;

    async fn insert_auth_tokens(&self, tokens: &[NewAuthToken]) -> Result<()>;

    /// Look up an unexpired session token by its hmac
    async fn auth_token(&self, hash: &str, kind: TokenKind) -> Result<Option<AuthToken>>;

    async fn delete_session(&self, session_id: &str) -> Result<u64>;

    async fn delete_expired_auth_tokens(&self, account_id: i64) -> Result<u64>;
}
