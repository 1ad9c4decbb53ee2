use chrono::{DateTime, Utc};

use crate::crypto::Enc;

pub const PROVIDER_SPOTIFY: &str = "spotify";

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    // `pbkdf2_sha256$<iterations>$<salt>$<hash>`
    pub password_hash: String,
    // only accepted accounts may read their private spotify data
    pub accepted_account: bool,
    pub profile_picture: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub accepted_account: bool,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct OAuthCredential {
    pub id: i64,
    pub account_id: i64,
    pub provider: String,
    // a provider access token, AES_256_GCM encrypted using the
    // application `enc_key` and the `access_nonce` generated
    // when the value was encrypted.
    pub access_token: String,
    pub access_nonce: String,
    // a provider token that can be used to refresh the
    // access_token. Encrypted and stored the same way.
    pub refresh_token: String,
    pub refresh_nonce: String,
    // the access_token is only valid while now < expires_at
    pub expires_at: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl OAuthCredential {
    pub fn access_enc(&self) -> Enc {
        Enc {
            value: self.access_token.clone(),
            nonce: self.access_nonce.clone(),
        }
    }

    pub fn refresh_enc(&self) -> Enc {
        Enc {
            value: self.refresh_token.clone(),
            nonce: self.refresh_nonce.clone(),
        }
    }
}

/// Sealed token values ready to be written to the credential store
#[derive(Debug, Clone)]
pub struct SealedTokens {
    pub access: Enc,
    pub refresh: Enc,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct AuthToken {
    pub id: i64,
    // the hmac (hex encoded) of the token handed to the client
    pub hash: String,
    pub account_id: i64,
    // shared by the access/refresh pair issued together
    pub session_id: String,
    pub kind: String,
    pub expires: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuthToken {
    pub hash: String,
    pub account_id: i64,
    pub session_id: String,
    pub kind: TokenKind,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, async_graphql::SimpleObject)]
pub struct Track {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub link: String,
    pub cover: Option<String>,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, async_graphql::SimpleObject)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub description: String,
    pub href: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, async_graphql::SimpleObject)]
pub struct PlaylistOwner {
    pub id: String,
    pub name: Option<String>,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, async_graphql::SimpleObject)]
pub struct PlaylistInfo {
    pub playlist_name: String,
    pub playlist_description: String,
    pub playlist_url: String,
    pub owner_name: Option<String>,
    pub owner_url: String,
}
