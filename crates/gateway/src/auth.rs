//! Gateway authentication.
//!
//! The shared token lives in a 0600 file under the orchestrator dir;
//! comparison is constant-time via SHA-256 digests so length never
//! leaks. Each connection gets a single-use challenge nonce with a
//! short TTL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use bv_domain::error::{Error, Result};

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
pub fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owner-only token file management.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the existing token without creating one. Errors when the
    /// file is missing or empty (no gateway has run here yet).
    pub fn load(&self) -> Result<String> {
        if !self.path.exists() {
            return Err(Error::Auth(format!(
                "gateway token not found at {}",
                self.path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
        let token = raw.trim().to_owned();
        if token.is_empty() {
            return Err(Error::Auth("gateway token file is empty".to_owned()));
        }
        Ok(token)
    }

    /// Read the existing token, minting one on first use.
    pub fn load_or_create(&self) -> Result<String> {
        match self.load() {
            Ok(token) => Ok(token),
            Err(_) => self.rotate(),
        }
    }

    /// Mint and persist a fresh token with 0600 permissions.
    pub fn rotate(&self) -> Result<String> {
        let token = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        std::fs::write(&self.path, &token).map_err(Error::Io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(Error::Io)?;
        }
        Ok(token)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Challenge nonces
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single-use handshake nonces with a freshness window.
pub struct Challenges {
    ttl_ms: i64,
    pending: Mutex<HashMap<String, i64>>,
}

impl Challenges {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: ttl_ms as i64,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a nonce for a newly-opened connection.
    pub fn issue(&self) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now().timestamp_millis();
        let mut pending = self.pending.lock();
        pending.retain(|_, issued| now - *issued <= self.ttl_ms);
        pending.insert(nonce.clone(), now);
        nonce
    }

    /// Consume a nonce; false if unknown, reused, or stale.
    pub fn validate(&self, nonce: &str) -> bool {
        let now = Utc::now().timestamp_millis();
        match self.pending.lock().remove(nonce) {
            Some(issued) => now - issued <= self.ttl_ms,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_eq_handles_length_mismatch() {
        assert!(token_eq("secret", "secret"));
        assert!(!token_eq("secret", "secrets"));
        assert!(!token_eq("secret", ""));
    }

    #[test]
    fn token_file_persists_and_rotates() {
        let tmp = tempfile::tempdir().unwrap();
        let file = TokenFile::new(&tmp.path().join("gateway.token"));

        // No token yet: read-only load refuses, create path mints.
        assert!(file.load().is_err());
        let first = file.load_or_create().unwrap();
        let again = file.load_or_create().unwrap();
        assert_eq!(first, again);
        assert_eq!(file.load().unwrap(), first);

        let rotated = file.rotate().unwrap();
        assert_ne!(first, rotated);
        assert_eq!(file.load_or_create().unwrap(), rotated);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn nonces_are_single_use() {
        let challenges = Challenges::new(30_000);
        let nonce = challenges.issue();
        assert!(challenges.validate(&nonce));
        assert!(!challenges.validate(&nonce));
        assert!(!challenges.validate("made-up"));
    }

    #[test]
    fn stale_nonce_is_rejected() {
        let challenges = Challenges::new(0);
        let nonce = challenges.issue();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!challenges.validate(&nonce));
    }
}
