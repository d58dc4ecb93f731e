use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::error;

use crate::config::PasswordConfig;

/// Argon2id hashing with a configurable work factor.
#[derive(Debug, Clone)]
pub struct Passwords {
    params: Params,
    /// Hash of a random secret, verified against when no user matches.
    dummy_hash: Arc<str>,
}

impl Passwords {
    pub fn new(cfg: &PasswordConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        let mut passwords = Self {
            params,
            dummy_hash: Arc::from(""),
        };
        let secret = SaltString::generate(&mut OsRng);
        passwords.dummy_hash = Arc::from(passwords.hash(secret.as_str())?);
        Ok(passwords)
    }

    /// Same-cost stand-in for a stored hash, so lookups that miss take as
    /// long as a wrong password.
    pub fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Parameters are read back from the stored hash, so hashes made under an
    /// older work factor still verify.
    pub fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(self
            .argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
impl Passwords {
    pub(crate) fn with_dummy_hash(mut self, hash: &str) -> Self {
        self.dummy_hash = Arc::from(hash);
        self
    }
}

#[cfg(test)]
pub(crate) fn fast() -> Passwords {
    Passwords::new(&PasswordConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .expect("valid test params")
}
