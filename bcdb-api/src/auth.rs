use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use bcdb_core::config::AuthConfig;
use bcdb_core::Caller;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tonic::metadata::MetadataMap;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};

/// Metadata key carrying the caller's user name
pub const USER_HEADER: &str = "x-bcdb-user";

/// Metadata key carrying `Bearer <api key>`
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Produce an argon2 PHC string for `key`, suitable for `auth.users`
pub fn hash_key(key: &str) -> ApiResult<String> {
    hash_key_with(&Argon2::default(), key)
}

pub fn hash_key_with(argon2: &Argon2<'_>, key: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(argon2
        .hash_password(key.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Key hashing failed: {}", e)))?
        .to_string())
}

/// Verifies caller credentials against the configured key hashes
pub struct Authenticator {
    /// User name to argon2 PHC hash
    users: HashMap<String, String>,
    owner: Option<String>,
    /// SHA-256 of user and key pairs that already passed argon2
    verified: RwLock<HashSet<[u8; 32]>>,
}

fn digest(user: &str, key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

fn header<'a>(metadata: &'a MetadataMap, key: &str) -> ApiResult<&'a str> {
    metadata
        .get(key)
        .ok_or_else(|| ApiError::AuthenticationFailed(format!("missing {} metadata", key)))?
        .to_str()
        .map_err(|_| ApiError::AuthenticationFailed(format!("malformed {} metadata", key)))
}

impl Authenticator {
    pub fn new(users: HashMap<String, String>, owner: Option<String>) -> Self {
        Self {
            users,
            owner,
            verified: RwLock::new(HashSet::new()),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.users.iter().map(|(u, h)| (u.clone(), h.clone())).collect(),
            config.owner.clone(),
        )
    }

    fn caller(&self, user: &str) -> Caller {
        if self.owner.as_deref() == Some(user) {
            Caller::owner(user)
        } else {
            Caller::user(user)
        }
    }

    /// Check a user name and API key
    pub async fn verify(&self, user: &str, key: &str) -> ApiResult<Caller> {
        let phc = self
            .users
            .get(user)
            .ok_or_else(|| ApiError::AuthenticationFailed("unknown user or bad key".to_string()))?;

        let fingerprint = digest(user, key);
        if self.verified.read().await.contains(&fingerprint) {
            return Ok(self.caller(user));
        }

        let parsed = PasswordHash::new(phc)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Invalid key hash for {}: {}", user, e)))?;

        Argon2::default()
            .verify_password(key.as_bytes(), &parsed)
            .map_err(|_| {
                warn!(%user, "Rejected API key");
                ApiError::AuthenticationFailed("unknown user or bad key".to_string())
            })?;

        debug!(%user, fingerprint = %hex::encode(&fingerprint[..8]), "Verified API key");
        self.verified.write().await.insert(fingerprint);
        Ok(self.caller(user))
    }

    /// Resolve the caller from request metadata
    pub async fn authenticate(&self, metadata: &MetadataMap) -> ApiResult<Caller> {
        let user = header(metadata, USER_HEADER)?;
        let key = header(metadata, AUTHORIZATION_HEADER)?
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::AuthenticationFailed("expected a Bearer key".to_string()))?;

        let result = self.verify(user, key.trim()).await;
        if result.is_err() {
            metrics::counter!("bcdb.auth.failures").increment(1);
        }
        result
    }
}
