use std::collections::HashMap;
use std::path::{Path, PathBuf};

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::{STANDARD, decode_config};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::Deserialize;

use crate::ports::store::{CredentialVerifier, Principal};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to read users file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid users file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to hash password: {0}")]
    Hash(String),
}

#[derive(Debug, Default, Deserialize)]
struct UsersDocument {
    #[serde(default)]
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    username: String,
    /// Argon2 PHC string.
    password: String,
}

/// Administrators allowed to manage notifications, read from a TOML file:
///
/// ```toml
/// [[users]]
/// username = "admin"
/// password = "$argon2id$v=19$..."
/// ```
#[derive(Debug)]
pub struct UsersFile {
    users: HashMap<String, String>,
    /// Checked in place of a real hash when the user is unknown.
    decoy: String,
}

impl UsersFile {
    fn new(users: HashMap<String, String>) -> Self {
        let decoy = match hash_password("pushcast-decoy") {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(error = %err, "could not prepare decoy hash");
                String::new()
            }
        };
        Self { users, decoy }
    }

    /// Reads `path`. A missing or broken file yields a verifier that denies
    /// everyone.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(users) => {
                tracing::info!(path = %path.display(), users = users.users.len(), "loaded users");
                users
            }
            Err(err) => {
                tracing::error!(error = %err, "no administrators configured, denying all");
                Self::new(HashMap::new())
            }
        }
    }

    pub fn read(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AuthError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: UsersDocument = toml::from_str(&raw).map_err(|source| AuthError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let users = document
            .users
            .into_iter()
            .map(|user| (user.username.trim().to_string(), user.password))
            .collect();
        Ok(Self::new(users))
    }
}

impl CredentialVerifier for UsersFile {
    /// Runs one argon2 verification whether or not the user exists.
    fn verify(&self, username: &str, password: &str) -> Option<Principal> {
        let username = username.trim();
        match self.users.get(username) {
            Some(password_hash) => verify_password(password, password_hash)
                .then(|| Principal(username.to_string())),
            None => {
                verify_password(password, &self.decoy);
                None
            }
        }
    }
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    let hash = match PasswordHash::new(password_hash) {
        Ok(hash) => hash,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .is_ok()
}

/// PHC string for a users file entry.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut rng = OsRng;
    hash_password_with_rng(password, &mut rng)
}

pub(crate) fn hash_password_with_rng<R: RngCore + CryptoRng>(
    password: &str,
    rng: &mut R,
) -> Result<String, AuthError> {
    let salt = SaltString::generate(rng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Hash(err.to_string()))
}

/// Splits an `Authorization: Basic ...` header value into user and password.
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = decode_config(encoded.trim(), STANDARD).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use base64::encode_config;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn users_file(dir: &Path, password_hash: &str) -> PathBuf {
        let path = dir.join("users.toml");
        std::fs::write(
            &path,
            format!("[[users]]\nusername = \"admin\"\npassword = \"{password_hash}\"\n"),
        )
        .expect("write users");
        path
    }

    #[test]
    fn verify__should_accept_matching_password() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let hash = hash_password("secret").expect("hash");
        let users = UsersFile::load(&users_file(dir.path(), &hash));

        // When
        let principal = users.verify("admin", "secret");

        // Then
        assert_eq!(principal, Some(Principal("admin".to_string())));
    }

    #[test]
    fn verify__should_reject_wrong_password_and_unknown_user() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let hash = hash_password("secret").expect("hash");
        let users = UsersFile::load(&users_file(dir.path(), &hash));

        // Then
        assert_eq!(users.verify("admin", "guess"), None);
        assert_eq!(users.verify("root", "secret"), None);
    }

    #[test]
    fn verify__should_check_unknown_user_against_decoy_hash() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let hash = hash_password("secret").expect("hash");
        let users = UsersFile::load(&users_file(dir.path(), &hash));

        // When
        let principal = users.verify("root", "pushcast-decoy");

        // Then
        assert_eq!(principal, None);
        assert!(PasswordHash::new(&users.decoy).is_ok());
        assert!(verify_password("pushcast-decoy", &users.decoy));
    }

    #[test]
    fn load__should_deny_everyone_when_file_is_missing() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");

        // When
        let users = UsersFile::load(&dir.path().join("users.toml"));

        // Then
        assert!(users.users.is_empty());
        assert_eq!(users.verify("admin", ""), None);
    }

    #[test]
    fn read__should_report_malformed_file() {
        // Given
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.toml");
        std::fs::write(&path, "[[users]]\nusername = 3\n").expect("write");

        // When
        let result = UsersFile::read(&path);

        // Then
        assert!(matches!(result, Err(AuthError::Parse { .. })));
    }

    #[test]
    fn hash_password_with_rng__should_be_deterministic_for_seed() {
        // Given
        let mut first = StdRng::from_seed([9u8; 32]);
        let mut second = StdRng::from_seed([9u8; 32]);

        // When
        let a = hash_password_with_rng("secret", &mut first).expect("hash");
        let b = hash_password_with_rng("secret", &mut second).expect("hash");

        // Then
        assert_eq!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password("secret", &a));
    }

    #[test]
    fn parse_basic__should_split_credentials() {
        // Given
        let header = format!("Basic {}", encode_config("admin:pa:ss", STANDARD));

        // Then
        assert_eq!(
            parse_basic(&header),
            Some(("admin".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic("Bearer abc"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
    }
}
