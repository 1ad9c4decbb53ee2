use async_mutex::Mutex;
use chrono::{DateTime, Utc};

use crate::crypto::Enc;
use crate::models::{
    Account, AuthToken, NewAccount, NewAuthToken, OAuthCredential, SealedTokens, TokenKind,
};
use crate::{Error, Result};

#[derive(Default)]
struct Tables {
    next_id: i64,
    accounts: Vec<Account>,
    credentials: Vec<OAuthCredential>,
    auth_tokens: Vec<AuthToken>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemStore {
    tables: Mutex<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored credential's expiry
    #[cfg(test)]
    pub(crate) async fn set_credential_expiry(&self, account_id: i64, expires_at: DateTime<Utc>) {
        let mut t = self.tables.lock().await;
        for c in t.credentials.iter_mut().filter(|c| c.account_id == account_id) {
            c.expires_at = expires_at;
        }
    }

    #[cfg(test)]
    pub(crate) async fn auth_token_count(&self) -> usize {
        self.tables.lock().await.auth_tokens.len()
    }
}

#[async_trait::async_trait]
impl super::Store for MemStore {
    async fn create_account(&self, new: NewAccount) -> Result<Account> {
        let mut t = self.tables.lock().await;
        if t.accounts.iter().any(|a| a.username == new.username) {
            return Err(Error::Conflict("User already exist !".into()));
        }
        let now = Utc::now();
        let account = Account {
            id: t.next_id(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            accepted_account: new.accepted_account,
            profile_picture: None,
            created: now,
            modified: now,
        };
        t.accounts.push(account.clone());
        Ok(account)
    }

    async fn account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let t = self.tables.lock().await;
        Ok(t.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let t = self.tables.lock().await;
        Ok(t.accounts.iter().find(|a| a.username == username).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.tables.lock().await.accounts.clone())
    }

    async fn credential(
        &self,
        account_id: i64,
        provider: &str,
    ) -> Result<Option<OAuthCredential>> {
        let t = self.tables.lock().await;
        Ok(t
            .credentials
            .iter()
            .find(|c| c.account_id == account_id && c.provider == provider)
            .cloned())
    }

    async fn upsert_credential(
        &self,
        account_id: i64,
        provider: &str,
        tokens: &SealedTokens,
    ) -> Result<OAuthCredential> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        if let Some(c) = t
            .credentials
            .iter_mut()
            .find(|c| c.account_id == account_id && c.provider == provider)
        {
            c.access_token = tokens.access.value.clone();
            c.access_nonce = tokens.access.nonce.clone();
            c.refresh_token = tokens.refresh.value.clone();
            c.refresh_nonce = tokens.refresh.nonce.clone();
            c.expires_at = tokens.expires_at;
            c.modified = now;
            return Ok(c.clone());
        }
        let credential = OAuthCredential {
            id: t.next_id(),
            account_id,
            provider: provider.to_string(),
            access_token: tokens.access.value.clone(),
            access_nonce: tokens.access.nonce.clone(),
            refresh_token: tokens.refresh.value.clone(),
            refresh_nonce: tokens.refresh.nonce.clone(),
            expires_at: tokens.expires_at,
            created: now,
            modified: now,
        };
        t.credentials.push(credential.clone());
        Ok(credential)
    }

    async fn update_access_token(
        &self,
        account_id: i64,
        provider: &str,
        access: &Enc,
        expires_at: DateTime<Utc>,
        refresh: Option<&Enc>,
    ) -> Result<()> {
        let mut t = self.tables.lock().await;
        if let Some(c) = t
            .credentials
            .iter_mut()
            .find(|c| c.account_id == account_id && c.provider == provider)
        {
            c.access_token = access.value.clone();
            c.access_nonce = access.nonce.clone();
            c.expires_at = expires_at;
            if let Some(refresh) = refresh {
                c.refresh_token = refresh.value.clone();
                c.refresh_nonce = refresh.nonce.clone();
            }
            c.modified = Utc::now();
        }
        Ok(())
    }

    async fn insert_auth_tokens(&self, tokens: &[NewAuthToken]) -> Result<()> {
        let mut t = self.tables.lock().await;
        if tokens
            .iter()
            .any(|n| t.auth_tokens.iter().any(|a| a.hash == n.hash))
        {
            return Err(crate::se!("duplicate auth token hash"));
        }
        for token in tokens {
            let id = t.next_id();
            t.auth_tokens.push(AuthToken {
                id,
                hash: token.hash.clone(),
                account_id: token.account_id,
                session_id: token.session_id.clone(),
                kind: token.kind.as_str().to_string(),
                expires: token.expires,
                created: Utc::now(),
            });
        }
        Ok(())
    }

    async fn auth_token(&self, hash: &str, kind: TokenKind) -> Result<Option<AuthToken>> {
        let t = self.tables.lock().await;
        let now = Utc::now();
        Ok(t
            .auth_tokens
            .iter()
            .find(|a| a.hash == hash && a.kind == kind.as_str() && a.expires > now)
            .cloned())
    }

    async fn delete_session(&self, session_id: &str) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let before = t.auth_tokens.len();
        t.auth_tokens.retain(|a| a.session_id != session_id);
        Ok((before - t.auth_tokens.len()) as u64)
    }

    async fn delete_expired_auth_tokens(&self, account_id: i64) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let before = t.auth_tokens.len();
        t.auth_tokens
            .retain(|a| !(a.account_id == account_id && a.expires <= now));
        Ok((before - t.auth_tokens.len()) as u64)
    }
}
