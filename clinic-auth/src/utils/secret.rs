use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// Plaintext secret as submitted by a caller. Never logged.
#[derive(Clone)]
pub struct PlainSecret(String);

impl PlainSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PlainSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlainSecret([redacted])")
    }
}

/// PHC-formatted Argon2 hash as held by the identity store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHash(String);

impl SecretHash {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHash([redacted])")
    }
}

/// Hash a secret with Argon2id and a fresh random salt.
pub fn hash_secret(secret: &PlainSecret) -> Result<SecretHash, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(secret.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash secret: {}", e))?
        .to_string();

    Ok(SecretHash::new(hash))
}

/// Constant-time check of `secret` against a stored hash.
pub fn verify_secret(secret: &PlainSecret, hash: &SecretHash) -> bool {
    match PasswordHash::new(hash.as_str()) {
        Ok(parsed) => Argon2::default()
            .verify_password(secret.as_str().as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored secret hash is malformed");
            false
        }
    }
}

/// Hash of a random secret nobody holds, built once per process.
fn decoy_hash() -> Option<&'static SecretHash> {
    static DECOY: OnceLock<Option<SecretHash>> = OnceLock::new();
    DECOY
        .get_or_init(|| {
            hash_secret(&PlainSecret::new(Uuid::new_v4().to_string()))
                .map_err(|e| tracing::error!(error = %e, "Could not build decoy hash"))
                .ok()
        })
        .as_ref()
}

/// Spend one Argon2 verification on a decoy hash and report failure. Used
/// when no stored hash exists, so unknown identifiers cost the same as
/// wrong secrets.
pub fn verify_secret_decoy(secret: &PlainSecret) -> bool {
    if let Some(hash) = decoy_hash() {
        let _ = verify_secret(secret, hash);
    }
    false
}
