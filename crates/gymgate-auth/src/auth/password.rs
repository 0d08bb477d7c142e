/// Password hashing, verification, and strength validation
///
/// Hashing uses Argon2id with OWASP-recommended parameters. The PHC
/// string embeds the salt, so the same plaintext hashes differently on
/// every call and no separate salt storage is needed.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common substrings rejected case-insensitively.
const COMMON_PATTERNS: &[&str] = &[
    "123456", "password", "qwerty", "abc123", "letmein", "admin", "welcome", "monkey", "111111",
    "dragon",
];

const MIN_LENGTH: usize = 8;
const MAX_LENGTH: usize = 128;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Argon2 parameters
///
/// Tuned for security while keeping login latency acceptable. Hashing is
/// intentionally slow; callers must treat it as a blocking-but-bounded
/// operation.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism (threads, default: 4)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: Option<usize>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
            output_len: Some(32),
        }
    }
}

impl PasswordConfig {
    fn to_params(&self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            self.output_len,
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }
}

/// Hash a plaintext password using Argon2id.
///
/// The salt is freshly randomized per call, so hashing the same password
/// twice yields two different strings that both verify.
///
/// # Arguments
///
/// * `password` - Plaintext password to hash
///
/// # Returns
///
/// * `Ok(String)` - PHC-format hash string (`$argon2id$...`), safe to
///   store as-is; the salt and parameters are embedded
/// * `Err(PasswordError)` - Hashing failed
///
/// # Example
///
/// ```
/// use gymgate_auth::auth::password::{hash_password, verify_password};
///
/// let hash = hash_password("SecureP@ssw0rd!").unwrap();
/// assert!(verify_password("SecureP@ssw0rd!", &hash).unwrap());
/// assert!(!verify_password("WrongOne9!", &hash).unwrap());
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_config(password, &PasswordConfig::default())
}

/// Hash a password with custom Argon2 parameters.
pub fn hash_password_with_config(
    password: &str,
    config: &PasswordConfig,
) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = config.to_params()?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash.
///
/// Uses the hash function's own comparison, never manual string equality.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    let argon2 = Argon2::default();

    match argon2.verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

/// Outcome of a strength check
///
/// `score` is advisory feedback for the UI (0-100); only `is_valid`
/// gates acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordStrength {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub score: u8,
}

/// Validate password strength.
///
/// Requirements: 8-128 characters, at least one uppercase letter, one
/// lowercase letter, one digit, and one symbol; no run of three or more
/// identical characters; no common substrings ("123456", "qwerty", ...).
pub fn validate_password_strength(password: &str) -> PasswordStrength {
    let mut errors = Vec::new();

    let length = password.chars().count();
    if length < MIN_LENGTH {
        errors.push(format!(
            "Password must be at least {MIN_LENGTH} characters long"
        ));
    }
    if length > MAX_LENGTH {
        errors.push(format!(
            "Password must be at most {MAX_LENGTH} characters long"
        ));
    }

    if !password.chars().any(|c| c.is_uppercase()) {
        errors.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        errors.push("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one digit".to_string());
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        errors.push("Password must contain at least one special character".to_string());
    }

    let has_repetition = has_repeated_run(password, 3);
    if has_repetition {
        errors.push("Password must not repeat the same character three or more times".to_string());
    }

    let lowercased = password.to_lowercase();
    let common = COMMON_PATTERNS
        .iter()
        .find(|p| lowercased.contains(*p))
        .copied();
    if let Some(pattern) = common {
        errors.push(format!("Password must not contain \"{pattern}\""));
    }

    PasswordStrength {
        is_valid: errors.is_empty(),
        score: strength_score(password, has_repetition, common.is_some()),
        errors,
    }
}

/// True if any character repeats `run` or more times consecutively.
fn has_repeated_run(password: &str, run: usize) -> bool {
    let chars: Vec<char> = password.chars().collect();
    let mut count = 1;
    for pair in chars.windows(2) {
        if pair[0] == pair[1] {
            count += 1;
            if count >= run {
                return true;
            }
        } else {
            count = 1;
        }
    }
    false
}

/// Advisory 0-100 score: length bonus, character-class bonus, uniqueness
/// bonus, minus repetition/common-pattern penalties.
fn strength_score(password: &str, has_repetition: bool, has_common: bool) -> u8 {
    let length = password.chars().count();
    if length == 0 {
        return 0;
    }

    let mut score: i32 = (length.min(20) * 2) as i32;

    for class in [
        password.chars().any(|c| c.is_uppercase()),
        password.chars().any(|c| c.is_lowercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ] {
        if class {
            score += 10;
        }
    }

    let unique: std::collections::HashSet<char> = password.chars().collect();
    score += ((unique.len() * 20) / length) as i32;

    if has_repetition {
        score -= 15;
    }
    if has_common {
        score -= 25;
    }

    score.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lighter parameters so the hashing tests stay fast.
    fn test_config() -> PasswordConfig {
        PasswordConfig {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        }
    }

    #[test]
    fn test_hash_and_verify_password() {
        let password = "SecureP@ssw0rd!";
        let hash = hash_password_with_config(password, &test_config()).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("WrongOne9!", &hash).unwrap());
    }

    #[test]
    fn test_same_password_produces_different_hashes() {
        // Fresh random salt per call; both must still verify.
        let password = "SamePassw0rd!x";

        let hash1 = hash_password_with_config(password, &test_config()).unwrap();
        let hash2 = hash_password_with_config(password, &test_config()).unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_password(password, &hash1).unwrap());
        assert!(verify_password(password, &hash2).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        let result = verify_password("password", "invalid-hash-format");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat)));
    }

    #[test]
    fn test_strength_rejects_weak_samples() {
        let samples = [
            ("short", "at least 8 characters"),
            ("nouppercase123!", "uppercase"),
            ("NOLOWERCASE123!", "lowercase"),
            ("NoNumbers!", "digit"),
            ("NoSpecialChar123", "special character"),
        ];

        for (password, expected) in samples {
            let result = validate_password_strength(password);
            assert!(!result.is_valid, "{password} should be rejected");
            assert!(
                result.errors.iter().any(|e| e.contains(expected)),
                "{password}: expected an error mentioning {expected:?}, got {:?}",
                result.errors
            );
        }
    }

    #[test]
    fn test_strength_accepts_valid_samples() {
        for password in ["TestPass123!", "MyP@ssw0rd"] {
            let result = validate_password_strength(password);
            assert!(result.is_valid, "{password}: {:?}", result.errors);
            assert!(result.errors.is_empty());
        }
    }

    #[test]
    fn test_strength_rejects_repetition_and_common_patterns() {
        let repeated = validate_password_strength("Aaabbb111!xyz");
        assert!(!repeated.is_valid);

        let common = validate_password_strength("Qwerty12!good");
        assert!(!common.is_valid);
        assert!(common.errors.iter().any(|e| e.contains("qwerty")));
    }

    #[test]
    fn test_score_is_advisory_and_bounded() {
        let strong = validate_password_strength("V3ry&Long$Unique9Phrase!");
        let weak = validate_password_strength("aaa");

        assert!(strong.score > weak.score);
        assert!(strong.score <= 100);

        // A valid but short password still validates; the score never
        // gates acceptance.
        let minimal = validate_password_strength("Ab1!efgh");
        assert!(minimal.is_valid);
    }

    #[test]
    fn test_max_length_rejected() {
        let long = format!("Aa1!{}", "x".repeat(130));
        let result = validate_password_strength(&long);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("at most")));
    }
}
