use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

/// Upper bound on accepted plaintext length.
pub const MAX_PASSWORD_BYTES: usize = 1024;

/// Well-formed argon2id hash (default params) that no password maps to.
/// Verifying against it costs the same as a real verification.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$dGltaW5nLWR1bW15LXNsdA$AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password exceeds 1024 bytes")]
    TooLong,
    #[error("argon2 error: {0}")]
    Hash(String),
    #[error("hashing task failed: {0}")]
    Task(String),
}

pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    if plain.len() > MAX_PASSWORD_BYTES {
        return Err(PasswordError::TooLong);
    }
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            PasswordError::Hash(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        PasswordError::Hash(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Burns one verification so that a missing account takes as long to reject
/// as a wrong password.
pub fn dummy_verify(plain: &str) {
    let _ = verify_password(plain, DUMMY_HASH);
}

/// Runs `hash_password` on the blocking pool.
pub async fn hash_password_blocking(plain: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .map_err(|e| PasswordError::Task(e.to_string()))?
}

pub async fn verify_password_blocking(plain: String, hash: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .map_err(|e| PasswordError::Task(e.to_string()))?
}

pub async fn dummy_verify_blocking(plain: String) {
    let _ = tokio::task::spawn_blocking(move || dummy_verify(&plain)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_hash_accepts_only_its_own_password() {
        let hash = hash_password("first-secret-42").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(matches!(verify_password("first-secret-42", &hash), Ok(true)));
        assert!(matches!(verify_password("first-secret-43", &hash), Ok(false)));
        assert!(matches!(verify_password("", &hash), Ok(false)));
    }

    #[test]
    fn unparseable_stored_hash_is_a_hash_error() {
        for stored in ["", "plaintext-password", "$argon2id$v=19$m=19456,t=2,p=1$!!$AAAA"] {
            match verify_password("first-secret-42", stored) {
                Err(PasswordError::Hash(msg)) => assert!(!msg.is_empty()),
                other => panic!("expected PasswordError::Hash for {stored:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn length_cap_is_inclusive() {
        let at_cap = "p".repeat(MAX_PASSWORD_BYTES);
        assert!(hash_password(&at_cap).is_ok());
        // multi-byte chars count by bytes, not chars
        let over_cap = "é".repeat(MAX_PASSWORD_BYTES / 2 + 1);
        let err = hash_password(&over_cap).unwrap_err();
        assert!(matches!(err, PasswordError::TooLong));
        assert_eq!(err.to_string(), "password exceeds 1024 bytes");
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("repeat-me-please").unwrap();
        let b = hash_password("repeat-me-please").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_password_fails_closed() {
        let long = "x".repeat(MAX_PASSWORD_BYTES + 1);
        assert!(matches!(hash_password(&long), Err(PasswordError::TooLong)));
    }

    #[test]
    fn dummy_hash_parses_and_never_matches() {
        assert!(!verify_password("", DUMMY_HASH).expect("dummy hash must parse"));
        assert!(!verify_password("password", DUMMY_HASH).expect("dummy hash must parse"));
    }

    #[tokio::test]
    async fn blocking_wrappers_roundtrip() {
        let hash = hash_password_blocking("async-secret-1".into()).await.unwrap();
        assert!(verify_password_blocking("async-secret-1".into(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_password_blocking("async-secret-2".into(), hash)
            .await
            .unwrap());
    }
}
