/*!
Crypto things
*/
use ring::aead::BoundKey;
use std::num::NonZeroU32;

use crate::{Error, Result};

/// ring requires an implementor of `NonceSequence`,
/// which if a wrapping trait around `ring::aead::Nonce`.
/// We have to make a wrapper that can pass ownership
/// of the nonce exactly once.
struct OneNonceSequence {
    inner: Option<ring::aead::Nonce>,
}
impl OneNonceSequence {
    fn new(inner: ring::aead::Nonce) -> Self {
        Self { inner: Some(inner) }
    }
}

impl ring::aead::NonceSequence for OneNonceSequence {
    fn advance(&mut self) -> std::result::Result<ring::aead::Nonce, ring::error::Unspecified> {
        self.inner.take().ok_or(ring::error::Unspecified)
    }
}

fn crypto_err(msg: &str) -> Error {
    Error::Crypto(msg.to_string())
}

/// Return a `Vec` of secure random bytes of size `n`
pub fn rand_bytes(n: usize) -> Result<Vec<u8>> {
    use ring::rand::SecureRandom;
    let mut buf = vec![0; n];
    let sysrand = ring::rand::SystemRandom::new();
    sysrand
        .fill(&mut buf)
        .map_err(|_| crypto_err("Error getting random bytes"))?;
    Ok(buf)
}

pub fn new_nonce() -> Result<Vec<u8>> {
    rand_bytes(12)
}

/// Return the SHA256 hash of `bytes`
pub fn hash(bytes: &[u8]) -> Vec<u8> {
    let alg = &ring::digest::SHA256;
    let digest = ring::digest::digest(alg, bytes);
    Vec::from(digest.as_ref())
}

/// Encrypt `bytes` with the given `nonce` and `pass`
///
/// `bytes` are encrypted using AES_256_GCM, `nonce` is expected to be
/// 12-bytes, and `pass` 32-bytes
pub fn encrypt(bytes: &[u8], nonce: &[u8], pass: &[u8]) -> Result<Vec<u8>> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| crypto_err("Encryption nonce not unique"))?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass)
        .map_err(|_| crypto_err("Error building sealing key"))?;
    let mut key = ring::aead::SealingKey::new(key, nonce);
    let mut in_out = bytes.to_vec();
    key.seal_in_place_append_tag(ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| crypto_err("Failed encrypting bytes"))?;
    Ok(in_out)
}

/// Decrypt `bytes` with the given `nonce` and `pass`
///
/// `bytes` are decrypted using AES_256_GCM, `nonce` is expected to be
/// 12-bytes, and `pass` 32-bytes
pub fn decrypt<'a>(bytes: &'a mut [u8], nonce: &[u8], pass: &[u8]) -> Result<&'a [u8]> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| crypto_err("Decryption nonce not unique"))?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass)
        .map_err(|_| crypto_err("Error build opening key"))?;
    let mut key = ring::aead::OpeningKey::new(key, nonce);
    let out_slice = key
        .open_in_place(ring::aead::Aad::empty(), bytes)
        .map_err(|_| crypto_err("Failed decrypting bytes"))?;
    Ok(out_slice)
}

/// An encrypted value and the nonce it was sealed with, both hex encoded
#[derive(Debug, Clone, PartialEq)]
pub struct Enc {
    pub value: String,
    pub nonce: String,
}

/// Seals provider tokens at rest and signs session tokens,
/// all with the application `enc_key`.
pub struct Sealer {
    key: Vec<u8>,
}

impl Sealer {
    pub fn new(key: &str) -> Result<Self> {
        if key.len() != 32 {
            return Err(crypto_err("enc_key must be 32 bytes"));
        }
        Ok(Self {
            key: key.as_bytes().to_vec(),
        })
    }

    pub fn seal(&self, s: &str) -> Result<Enc> {
        let nonce = new_nonce()?;
        let b = encrypt(s.as_bytes(), &nonce, &self.key)?;
        Ok(Enc {
            value: hex::encode(&b),
            nonce: hex::encode(&nonce),
        })
    }

    pub fn open(&self, enc: &Enc) -> Result<String> {
        let nonce = hex::decode(&enc.nonce).map_err(|_| crypto_err("nonce hex decode error"))?;
        let mut value =
            hex::decode(&enc.value).map_err(|_| crypto_err("value hex decode error"))?;
        let bytes = decrypt(value.as_mut_slice(), &nonce, &self.key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| crypto_err("decrypted value not utf8"))
    }

    /// hmac-sha256 of `s`, hex encoded. Session tokens are only
    /// ever stored in this form.
    pub fn sign(&self, s: &str) -> String {
        let s_key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, &self.key);
        let tag = ring::hmac::sign(&s_key, s.as_bytes());
        hex::encode(&tag)
    }
}

/// A new opaque session token handed to a client
pub fn new_session_token(username: &str) -> Result<String> {
    let s = uuid::Uuid::new_v4().simple().to_string();
    let salt = hex::encode(rand_bytes(16)?);
    let s = format!("{}:{}:{}", username, s, salt);
    Ok(hex::encode(hash(s.as_bytes())))
}

const PBKDF2_PREFIX: &str = "pbkdf2_sha256";
#[cfg(not(test))]
const PBKDF2_ITERATIONS: u32 = 100_000;
#[cfg(test)]
const PBKDF2_ITERATIONS: u32 = 1_000;

/// Hash a password for storage as `pbkdf2_sha256$<iterations>$<salt>$<hash>`
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with(password, PBKDF2_ITERATIONS)
}

fn hash_password_with(password: &str, iterations: u32) -> Result<String> {
    let iters = NonZeroU32::new(iterations).ok_or_else(|| crypto_err("zero iterations"))?;
    let salt = rand_bytes(16)?;
    let mut out = [0u8; ring::digest::SHA256_OUTPUT_LEN];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        iters,
        &salt,
        password.as_bytes(),
        &mut out,
    );
    Ok(format!(
        "{}${}${}${}",
        PBKDF2_PREFIX,
        iterations,
        hex::encode(&salt),
        hex::encode(&out)
    ))
}

lazy_static::lazy_static! {
    /// Well formed hash that no password derives to. Checked in place of
    /// a missing account's hash so unknown usernames cost a full derivation.
    pub static ref DUMMY_PASSWORD_HASH: String = format!(
        "{}${}${}${}",
        PBKDF2_PREFIX,
        PBKDF2_ITERATIONS,
        "00".repeat(16),
        "00".repeat(ring::digest::SHA256_OUTPUT_LEN),
    );
}

/// The hash to verify a login against, the dummy hash when there is no account
pub fn stored_or_dummy(stored: Option<&str>) -> &str {
    stored.unwrap_or(DUMMY_PASSWORD_HASH.as_str())
}

/// Check `password` against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    if parts.len() != 4 || parts[0] != PBKDF2_PREFIX {
        return false;
    }
    let iters = match parts[1].parse::<u32>().ok().and_then(NonZeroU32::new) {
        Some(i) => i,
        None => return false,
    };
    let (salt, expected) = match (hex::decode(parts[2]), hex::decode(parts[3])) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return false,
    };
    ring::pbkdf2::verify(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        iters,
        &salt,
        password.as_bytes(),
        &expected,
    )
    .is_ok()
}
