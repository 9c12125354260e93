//! Password hashing and verification using Argon2id

use crate::{config::SecurityConfig, error::AppError};
use argon2::{Algorithm, Argon2, Params, Version};
use password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
};

/// Argon2id hasher with a per-deployment work factor
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    /// Build from explicit work-factor parameters
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, AppError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AppError::Config(format!("Invalid Argon2 params: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        Self::with_params(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
        )
    }

    /// Hash a password with a fresh random salt (PHC string format)
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!("Failed to hash password: {:?}", e);
                AppError::Internal(format!("Failed to hash password: {}", e))
            })?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against a stored hash.
    ///
    /// A mismatch is `Ok(false)`; only an unparseable stored hash is an error.
    /// Parameters embedded in the stored hash win over the configured ones, so
    /// hashes produced under an older work factor keep verifying.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            tracing::error!("Stored password hash is malformed: {:?}", e);
            AppError::Internal(format!("Malformed password hash: {}", e))
        })?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => {
                tracing::error!("Password verification failed: {:?}", e);
                Err(AppError::Internal(format!("Password verification failed: {}", e)))
            }
        }
    }

    /// Validate password against policy
    pub fn validate_password_policy(
        password: &str,
        policy: &SecurityConfig,
    ) -> Result<(), AppError> {
        let length = password.chars().count();

        if length < policy.password_min_length {
            return Err(AppError::PasswordTooWeak(format!(
                "must be at least {} characters",
                policy.password_min_length
            )));
        }

        if length > policy.password_max_length {
            return Err(AppError::PasswordTooWeak(format!(
                "must be at most {} characters",
                policy.password_max_length
            )));
        }

        if policy.password_require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            return Err(AppError::PasswordTooWeak(
                "must contain at least one uppercase letter".to_string(),
            ));
        }

        if policy.password_require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AppError::PasswordTooWeak(
                "must contain at least one digit".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn hasher() -> PasswordHasher {
        PasswordHasher::with_params(4096, 1, 1).unwrap()
    }

    fn policy() -> SecurityConfig {
        SecurityConfig {
            jwt_secret: Secret::new("test_secret_key_32_characters_long!".to_string()),
            jwt_issuer: "user-api".to_string(),
            access_token_exp_secs: 900,
            refresh_token_exp_secs: 604800,
            argon2_memory_kib: 4096,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            password_min_length: 8,
            password_max_length: 50,
            password_require_uppercase: true,
            password_require_digit: true,
            trust_proxy: false,
            allowed_ips: None,
            cors_allowed_origins: vec![],
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("pw123456").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("pw123456"));
        assert!(hasher.verify("pw123456", &hash).unwrap());
    }

    #[test]
    fn test_wrong_password_is_false_not_error() {
        let hasher = hasher();
        let hash = hasher.hash("pw123456").unwrap();

        assert!(!hasher.verify("wrongpassword", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_error() {
        let hasher = hasher();
        assert!(matches!(
            hasher.verify("pw123456", "not-a-phc-string"),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn test_same_password_hashes_differently() {
        let hasher = hasher();

        let hash1 = hasher.hash("pw123456").unwrap();
        let hash2 = hasher.hash("pw123456").unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.verify("pw123456", &hash1).unwrap());
        assert!(hasher.verify("pw123456", &hash2).unwrap());
    }

    #[test]
    fn test_hash_from_other_work_factor_still_verifies() {
        let old = PasswordHasher::with_params(8192, 2, 1).unwrap();
        let hash = old.hash("pw123456").unwrap();

        assert!(hasher().verify("pw123456", &hash).unwrap());
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(matches!(
            PasswordHasher::with_params(1, 0, 0),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_password_policy_validation() {
        let policy = policy();

        assert!(PasswordHasher::validate_password_policy("Test1234", &policy).is_ok());
        assert!(PasswordHasher::validate_password_policy("Test1", &policy).is_err());
        assert!(PasswordHasher::validate_password_policy("test1234", &policy).is_err());
        assert!(PasswordHasher::validate_password_policy("Testtest", &policy).is_err());
        assert!(matches!(
            PasswordHasher::validate_password_policy(&"A1".repeat(30), &policy),
            Err(AppError::PasswordTooWeak(_))
        ));
    }
}
