//! Credential storage: hash-only at rest, constant-time verification, and
//! the `Type[credential]` action's `value_key` resolution down to a
//! concrete field.
//!
//! Only the password hash is ever persisted. An action that types a
//! credential's `password` field resolves to the *hash string itself* —
//! see [`CredentialStore::resolve_value`] — which is unsuitable for
//! actually typing into a login form and is documented as such; the engine
//! never holds the plaintext password anywhere after [`CredentialStore::create`]
//! returns.

use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use pbkdf2::Pbkdf2;
use password_hash::rand_core::OsRng;

use crate::config::PasswordHashMethod;
use crate::error::{CredentialError, RepositoryError};
use crate::repository::CredentialRepo;

/// Which field of a credential a `Type[credential]` action's `value_key`
/// (`credName.username` / `credName.password`) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Username,
    Password,
}

/// Split `value_key` into `(credential_name, field)`.
pub fn parse_value_key(value_key: &str) -> Result<(&str, CredentialField), CredentialError> {
    let (name, field) = value_key
        .split_once('.')
        .ok_or_else(|| CredentialError::InvalidReference(value_key.to_string()))?;
    let field = match field {
        "username" => CredentialField::Username,
        "password" => CredentialField::Password,
        _ => return Err(CredentialError::InvalidReference(value_key.to_string())),
    };
    if name.is_empty() {
        return Err(CredentialError::InvalidReference(value_key.to_string()));
    }
    Ok((name, field))
}

pub struct CredentialStore {
    repo: Arc<dyn CredentialRepo>,
    hash_method: PasswordHashMethod,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn CredentialRepo>, hash_method: PasswordHashMethod) -> Self {
        Self { repo, hash_method }
    }

    /// Hash `password` with the configured method and persist
    /// `(username, hash)` under `name`.
    pub async fn create(&self, name: &str, username: &str, password: &str) -> Result<(), CredentialError> {
        let hash = self.hash_password(password)?;
        self.repo.create(name, username, &hash).await.map_err(CredentialError::from)
    }

    pub async fn delete(&self, name: &str) -> Result<(), CredentialError> {
        self.repo.delete(name).await.map_err(CredentialError::from)
    }

    pub async fn list(&self) -> Result<Vec<String>, CredentialError> {
        self.repo.list().await.map_err(CredentialError::from)
    }

    /// Verify a supplied plaintext password against the stored hash,
    /// constant-time. An unknown `name` returns `Ok(false)` rather than an
    /// error — only a genuine I/O/parse failure in the backing repo is
    /// propagated.
    pub async fn verify(&self, name: &str, password: &str) -> Result<bool, CredentialError> {
        let credential = match self.repo.get(name).await {
            Ok(credential) => credential,
            Err(RepositoryError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(CredentialError::from(err)),
        };
        Ok(self.verify_hash(&credential.password_hash, password))
    }

    /// Resolve a `Type[credential]` action's `value_key` to the literal
    /// string to type. `username` resolves to the stored username;
    /// `password` resolves to the stored hash (never the plaintext, which
    /// the engine does not retain).
    pub async fn resolve_value(&self, value_key: &str) -> Result<String, CredentialError> {
        let (name, field) = parse_value_key(value_key)?;
        let credential = self
            .repo
            .get(name)
            .await
            .map_err(|_| CredentialError::NotFound(name.to_string()))?;
        Ok(match field {
            CredentialField::Username => credential.username,
            CredentialField::Password => credential.password_hash,
        })
    }

    fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        match &self.hash_method {
            PasswordHashMethod::Argon2 => {
                let salt = SaltString::generate(&mut OsRng);
                Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|e| CredentialError::HashingFailed(e.to_string()))
            }
            PasswordHashMethod::Pbkdf2 { iterations, .. } => {
                let salt = SaltString::generate(&mut OsRng);
                let params = pbkdf2::Params {
                    rounds: *iterations,
                    output_length: 32,
                };
                let params_string = password_hash::ParamsString::try_from(&params)
                    .map_err(|e| CredentialError::HashingFailed(e.to_string()))?;
                Pbkdf2
                    .hash_password_customized(password.as_bytes(), None, None, params_string, &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|e| CredentialError::HashingFailed(e.to_string()))
            }
        }
    }

    fn verify_hash(&self, stored_hash: &str, candidate: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        match parsed.algorithm.as_str() {
            "argon2id" | "argon2i" | "argon2d" => Argon2::default().verify_password(candidate.as_bytes(), &parsed).is_ok(),
            "pbkdf2-sha256" | "pbkdf2-sha512" => Pbkdf2.verify_password(candidate.as_bytes(), &parsed).is_ok(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::file::FileRepository;

    fn store(hash_method: PasswordHashMethod) -> (CredentialStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(FileRepository::new(
            tmp.path().join("workflows"),
            tmp.path().join("templates"),
            tmp.path().join("credentials.json"),
            tmp.path().join("execution_logs"),
        ));
        (CredentialStore::new(repo, hash_method), tmp)
    }

    #[test]
    fn parses_value_key() {
        assert_eq!(parse_value_key("login.username").unwrap(), ("login", CredentialField::Username));
        assert_eq!(parse_value_key("login.password").unwrap(), ("login", CredentialField::Password));
        assert!(parse_value_key("login").is_err());
        assert!(parse_value_key("login.phone").is_err());
    }

    #[tokio::test]
    async fn argon2_round_trip_verifies() {
        let (store, _tmp) = store(PasswordHashMethod::Argon2);
        store.create("login", "alice", "hunter2").await.unwrap();
        assert!(store.verify("login", "hunter2").await.unwrap());
        assert!(!store.verify("login", "wrong").await.unwrap());
    }

    #[tokio::test]
    async fn verify_unknown_name_returns_false_not_error() {
        let (store, _tmp) = store(PasswordHashMethod::Argon2);
        assert!(!store.verify("nobody", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn pbkdf2_round_trip_verifies() {
        let (store, _tmp) = store(PasswordHashMethod::Pbkdf2 {
            digest: "sha256".to_string(),
            iterations: 10_000,
        });
        store.create("login", "alice", "hunter2").await.unwrap();
        assert!(store.verify("login", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn resolve_value_username_and_password() {
        let (store, _tmp) = store(PasswordHashMethod::Argon2);
        store.create("login", "alice", "hunter2").await.unwrap();
        assert_eq!(store.resolve_value("login.username").await.unwrap(), "alice");
        let resolved_password = store.resolve_value("login.password").await.unwrap();
        assert_ne!(resolved_password, "hunter2");
        assert!(resolved_password.starts_with("$argon2"));
    }
}
