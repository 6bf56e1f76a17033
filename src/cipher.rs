//! Secret cipher boundary guarding credential material at the persistence
//! edge.
//!
//! At-rest format: `v1.<key_id>.<nonce b64>.<ciphertext b64>`. Encryption
//! always uses the keyring's first (primary) key and stamps its id into the
//! stored value; decryption selects the key by the stored id, so rotated-out
//! primaries keep decrypting historical values for as long as they remain on
//! the ring.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use zeroize::Zeroizing;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// 12-byte nonce for AES-GCM (96 bits is the standard).
pub const NONCE_SIZE: usize = 12;

const FORMAT_VERSION: &str = "v1";

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("unknown cipher key id '{0}'")]
    UnknownKey(String),
    #[error("malformed ciphertext")]
    Malformed,
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// One keyring entry. Key bytes are zeroized on drop.
#[derive(Clone)]
pub struct CipherKey {
    id: String,
    bytes: Zeroizing<[u8; KEY_SIZE]>,
}

impl CipherKey {
    pub fn new(id: impl Into<String>, bytes: [u8; KEY_SIZE]) -> Result<Self, CipherError> {
        let id = id.into();
        if id.is_empty() || id.contains('.') {
            return Err(CipherError::InvalidKey(format!(
                "key id '{id}' must be non-empty and must not contain '.'"
            )));
        }
        Ok(Self {
            id,
            bytes: Zeroizing::new(bytes),
        })
    }

    pub fn from_base64(id: impl Into<String>, encoded: &str) -> Result<Self, CipherError> {
        let decoded = B64
            .decode(encoded.trim())
            .map_err(|err| CipherError::InvalidKey(err.to_string()))?;
        let bytes: [u8; KEY_SIZE] = decoded.try_into().map_err(|_| {
            CipherError::InvalidKey(format!("key must be exactly {KEY_SIZE} bytes"))
        })?;
        Self::new(id, bytes)
    }

    /// Random key, mostly useful for tests and local development.
    pub fn generate(id: impl Into<String>) -> Result<Self, CipherError> {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(id, bytes)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Ordered, rotatable key list. The first key is the write key.
#[derive(Debug, Clone)]
pub struct Keyring {
    keys: Vec<CipherKey>,
}

impl Keyring {
    pub fn new(keys: Vec<CipherKey>) -> Result<Self, CipherError> {
        if keys.is_empty() {
            return Err(CipherError::InvalidKey("keyring must hold at least one key".into()));
        }
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].iter().any(|other| other.id == key.id) {
                return Err(CipherError::InvalidKey(format!(
                    "duplicate key id '{}'",
                    key.id
                )));
            }
        }
        Ok(Self { keys })
    }

    pub fn primary(&self) -> &CipherKey {
        &self.keys[0]
    }

    fn find(&self, id: &str) -> Option<&CipherKey> {
        self.keys.iter().find(|key| key.id == id)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let key = self.primary();
        let cipher = Aes256Gcm::new_from_slice(key.bytes.as_slice())
            .map_err(|err| CipherError::InvalidKey(err.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|err| CipherError::Encrypt(err.to_string()))?;

        Ok(format!(
            "{FORMAT_VERSION}.{}.{}.{}",
            key.id,
            B64.encode(nonce_bytes),
            B64.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CipherError> {
        let mut parts = stored.splitn(4, '.');
        let (version, key_id, nonce_b64, ciphertext_b64) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(version), Some(key_id), Some(nonce), Some(ciphertext)) => {
                (version, key_id, nonce, ciphertext)
            }
            _ => return Err(CipherError::Malformed),
        };
        if version != FORMAT_VERSION {
            return Err(CipherError::Malformed);
        }

        let key = self
            .find(key_id)
            .ok_or_else(|| CipherError::UnknownKey(key_id.to_string()))?;

        let nonce_bytes = B64.decode(nonce_b64).map_err(|_| CipherError::Malformed)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CipherError::Malformed);
        }
        let ciphertext = B64
            .decode(ciphertext_b64)
            .map_err(|_| CipherError::Malformed)?;

        let cipher = Aes256Gcm::new_from_slice(key.bytes.as_slice())
            .map_err(|err| CipherError::InvalidKey(err.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|err| CipherError::Decrypt(err.to_string()))?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Malformed)
    }
}

/// Random alphanumeric credential, used when a confidential client is
/// created without a caller-supplied secret.
pub fn generate_secret(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(ids: &[&str]) -> Keyring {
        let keys = ids
            .iter()
            .map(|id| CipherKey::generate(*id).expect("valid key"))
            .collect();
        Keyring::new(keys).expect("valid keyring")
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let ring = ring_with(&["primary"]);
        let stored = ring.encrypt("hunter2-but-64-chars").expect("encrypt");

        assert!(stored.starts_with("v1.primary."));
        assert!(!stored.contains("hunter2"));
        assert_eq!(ring.decrypt(&stored).expect("decrypt"), "hunter2-but-64-chars");
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let ring = ring_with(&["primary"]);
        let a = ring.encrypt("same text").expect("encrypt");
        let b = ring.encrypt("same text").expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let ring = ring_with(&["primary"]);
        let stored = ring.encrypt("secret").expect("encrypt");

        let mut parts: Vec<String> = stored.split('.').map(str::to_string).collect();
        let mut ciphertext = B64.decode(&parts[3]).expect("decode");
        ciphertext[0] ^= 0xff;
        parts[3] = B64.encode(ciphertext);

        let err = ring.decrypt(&parts.join(".")).expect_err("tamper must fail");
        assert!(matches!(err, CipherError::Decrypt(_)));
    }

    #[test]
    fn rotated_out_primary_still_decrypts_by_key_id() {
        let old = CipherKey::generate("2025-01").expect("valid key");
        let old_ring = Keyring::new(vec![old.clone()]).expect("valid keyring");
        let stored = old_ring.encrypt("legacy secret").expect("encrypt");

        let rotated = Keyring::new(vec![CipherKey::generate("2026-01").expect("valid key"), old])
            .expect("valid keyring");
        assert_eq!(rotated.decrypt(&stored).expect("decrypt"), "legacy secret");

        // New writes must carry the new primary's id.
        let fresh = rotated.encrypt("new secret").expect("encrypt");
        assert!(fresh.starts_with("v1.2026-01."));
    }

    #[test]
    fn unknown_key_id_is_reported_as_such() {
        let ring = ring_with(&["a"]);
        let stored = ring.encrypt("secret").expect("encrypt");
        let other = ring_with(&["b"]);

        let err = other.decrypt(&stored).expect_err("unknown key id");
        assert!(matches!(err, CipherError::UnknownKey(id) if id == "a"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let ring = ring_with(&["primary"]);
        for stored in ["", "v1", "v1.primary", "v2.primary.AAAA.AAAA", "v1.primary.!!.!!"] {
            assert!(
                matches!(ring.decrypt(stored), Err(CipherError::Malformed)),
                "expected malformed for {stored:?}"
            );
        }
    }

    #[test]
    fn keyring_rejects_bad_shapes() {
        assert!(Keyring::new(vec![]).is_err());
        assert!(CipherKey::new("has.dot", [0u8; KEY_SIZE]).is_err());

        let a = CipherKey::generate("dup").expect("valid key");
        let b = CipherKey::generate("dup").expect("valid key");
        assert!(Keyring::new(vec![a, b]).is_err());
    }

    #[test]
    fn generated_secrets_are_alphanumeric() {
        let secret = generate_secret(64);
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_secret(64));
    }
}
