use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::crypto::Enc;
use crate::models::{
    Account, AuthToken, NewAccount, NewAuthToken, OAuthCredential, SealedTokens, TokenKind,
};
use crate::{Error, Result, LOG};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        slog::info!(LOG, "database migrations applied");
        Ok(())
    }
}

#[async_trait::async_trait]
impl super::Store for PgStore {
    async fn create_account(&self, new: NewAccount) -> Result<Account> {
        let account = sqlx::query_as::<_, Account>(
            "
            insert into musik.accounts
                (username, email, password_hash, accepted_account)
            values ($1, $2, $3, $4)
            on conflict (username) do nothing
            returning *
            ",
        )
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.accepted_account)
        .fetch_optional(&self.pool)
        .await?;
        account.ok_or_else(|| Error::Conflict("User already exist !".into()))
    }

    async fn account_by_id(&self, id: i64) -> Result<Option<Account>> {
        Ok(
            sqlx::query_as::<_, Account>("select * from musik.accounts where id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(
            sqlx::query_as::<_, Account>("select * from musik.accounts where username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(
            sqlx::query_as::<_, Account>("select * from musik.accounts order by id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn credential(
        &self,
        account_id: i64,
        provider: &str,
    ) -> Result<Option<OAuthCredential>> {
        Ok(sqlx::query_as::<_, OAuthCredential>(
            "
            select * from musik.oauth_credentials
            where account_id = $1 and provider = $2
            ",
        )
        .bind(account_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_credential(
        &self,
        account_id: i64,
        provider: &str,
        tokens: &SealedTokens,
    ) -> Result<OAuthCredential> {
        Ok(sqlx::query_as::<_, OAuthCredential>(
            "
            insert into
            musik.oauth_credentials (
                account_id, provider,
                access_token, access_nonce,
                refresh_token, refresh_nonce,
                expires_at
            )
            values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (account_id, provider) do update set
            access_token = excluded.access_token, access_nonce = excluded.access_nonce,
            refresh_token = excluded.refresh_token, refresh_nonce = excluded.refresh_nonce,
            expires_at = excluded.expires_at,
            modified = now()
            returning *
            ",
        )
        .bind(account_id)
        .bind(provider)
        .bind(&tokens.access.value)
        .bind(&tokens.access.nonce)
        .bind(&tokens.refresh.value)
        .bind(&tokens.refresh.nonce)
        .bind(tokens.expires_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_access_token(
        &self,
        account_id: i64,
        provider: &str,
        access: &Enc,
        expires_at: DateTime<Utc>,
        refresh: Option<&Enc>,
    ) -> Result<()> {
        sqlx::query(
            "
            update musik.oauth_credentials set
                access_token = $1, access_nonce = $2, expires_at = $3,
                refresh_token = coalesce($4, refresh_token),
                refresh_nonce = coalesce($5, refresh_nonce),
                modified = now()
            where account_id = $6 and provider = $7
            ",
        )
        .bind(&access.value)
        .bind(&access.nonce)
        .bind(expires_at)
        .bind(refresh.map(|r| r.value.clone()))
        .bind(refresh.map(|r| r.nonce.clone()))
        .bind(account_id)
        .bind(provider)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_auth_tokens(&self, tokens: &[NewAuthToken]) -> Result<()> {
        let mut tr = self.pool.begin().await?;
        for token in tokens {
            sqlx::query(
                "
                insert into
                musik.auth_tokens (
                    hash, account_id, session_id, kind, expires
                )
                values ($1, $2, $3, $4, $5)
                ",
            )
            .bind(&token.hash)
            .bind(token.account_id)
            .bind(&token.session_id)
            .bind(token.kind.as_str())
            .bind(token.expires)
            .execute(&mut tr)
            .await?;
        }
        tr.commit().await?;
        Ok(())
    }

    async fn auth_token(&self, hash: &str, kind: TokenKind) -> Result<Option<AuthToken>> {
        Ok(sqlx::query_as::<_, AuthToken>(
            "
            select * from musik.auth_tokens
            where hash = $1 and kind = $2 and expires > now()
            ",
        )
        .bind(hash)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_session(&self, session_id: &str) -> Result<u64> {
        let done = sqlx::query("delete from musik.auth_tokens where session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn delete_expired_auth_tokens(&self, account_id: i64) -> Result<u64> {
        let done = sqlx::query(
            "delete from musik.auth_tokens where account_id = $1 and expires <= now()",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}
