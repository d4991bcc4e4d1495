// Password hashing and verification service
//
// Plaintext passwords stop at this boundary: they are hashed immediately and
// never logged, stored, or transmitted in a recoverable form.

use crate::auth::error::AuthError;
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;

/// Password service for hashing and verification
pub struct PasswordService;

impl PasswordService {
    /// Hash a password using Argon2id with a fresh random salt.
    /// Two calls with the same input produce different hashes; both verify.
    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| AuthError::PasswordHash)?;

        Ok(hash.to_string())
    }

    /// Verify a password against a stored PHC hash string.
    /// Returns false (never errors) on a malformed hash; Argon2's internal
    /// comparison is constant-time.
    pub fn verify_password(password: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = PasswordService::hash_password("Secret123").unwrap();
        assert!(PasswordService::verify_password("Secret123", &hash));
        assert!(!PasswordService::verify_password("Secret124", &hash));
    }

    #[test]
    fn test_same_password_hashes_differently() {
        let first = PasswordService::hash_password("Secret123").unwrap();
        let second = PasswordService::hash_password("Secret123").unwrap();

        // Salted: the strings differ, both still verify
        assert_ne!(first, second);
        assert!(PasswordService::verify_password("Secret123", &first));
        assert!(PasswordService::verify_password("Secret123", &second));
    }

    #[test]
    fn test_malformed_hash_verifies_false() {
        assert!(!PasswordService::verify_password("Secret123", ""));
        assert!(!PasswordService::verify_password("Secret123", "not-a-phc-string"));
        assert!(!PasswordService::verify_password("Secret123", "$argon2id$garbage"));
    }

    #[test]
    fn test_hash_never_contains_plaintext() {
        let hash = PasswordService::hash_password("hunter2hunter2").unwrap();
        assert!(!hash.contains("hunter2"));
    }

    proptest! {
        // Verification succeeds for any password we hashed, fails for a
        // different one. Argon2 is slow by construction, so keep cases low.
        #![proptest_config(ProptestConfig::with_cases(8))]
        #[test]
        fn prop_verify_matches_only_original(
            password in "[a-zA-Z0-9]{8,24}",
            other in "[a-zA-Z0-9]{8,24}"
        ) {
            let hash = PasswordService::hash_password(&password).unwrap();
            prop_assert!(PasswordService::verify_password(&password, &hash));
            if other != password {
                prop_assert!(!PasswordService::verify_password(&other, &hash));
            }
        }
    }
}
