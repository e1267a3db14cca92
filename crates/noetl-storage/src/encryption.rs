// Envelope encryption with key rotation support, for keychain secrets
// at rest (spec.md §4.6). AES-256-GCM with per-value DEKs wrapped by a
// versioned KEK. Reused verbatim from the credential-encryption scheme
// this crate's sibling keychain store depends on.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const DEK_SIZE: usize = 32;
const PAYLOAD_VERSION: u8 = 1;
const ALGORITHM: &str = "AES-256-GCM";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub version: u8,
    pub alg: String,
    pub key_id: String,
    pub dek_wrapped: String,
    pub nonce: String,
    pub ciphertext: String,
}

#[derive(Clone)]
struct VersionedKey {
    id: String,
    cipher: Aes256Gcm,
}

/// Thread-safe envelope-encryption service with key rotation.
#[derive(Clone)]
pub struct EncryptionService {
    primary_key: Arc<VersionedKey>,
    keys: Arc<HashMap<String, Aes256Gcm>>,
}

impl EncryptionService {
    pub fn new(primary_key: &str, previous_keys: &[&str]) -> Result<Self> {
        let (primary_id, primary_cipher) = Self::parse_versioned_key(primary_key)?;

        let mut keys = HashMap::new();
        keys.insert(primary_id.clone(), primary_cipher.clone());

        for key_str in previous_keys {
            let (id, cipher) = Self::parse_versioned_key(key_str)?;
            if keys.contains_key(&id) {
                anyhow::bail!("Duplicate key ID: {}", id);
            }
            keys.insert(id, cipher);
        }

        Ok(Self {
            primary_key: Arc::new(VersionedKey {
                id: primary_id,
                cipher: primary_cipher,
            }),
            keys: Arc::new(keys),
        })
    }

    /// `NOETL_KEYCHAIN_ENCRYPTION_KEY` (required) and
    /// `NOETL_KEYCHAIN_ENCRYPTION_KEY_PREVIOUS` (optional, for rotation).
    pub fn from_env() -> Result<Self> {
        let primary = std::env::var("NOETL_KEYCHAIN_ENCRYPTION_KEY")
            .context("NOETL_KEYCHAIN_ENCRYPTION_KEY environment variable not set")?;

        let previous_keys: Vec<String> = std::env::var("NOETL_KEYCHAIN_ENCRYPTION_KEY_PREVIOUS")
            .ok()
            .into_iter()
            .collect();
        let previous_refs: Vec<&str> = previous_keys.iter().map(|s| s.as_str()).collect();

        Self::new(&primary, &previous_refs)
    }

    fn parse_versioned_key(key_str: &str) -> Result<(String, Aes256Gcm)> {
        let parts: Vec<&str> = key_str.splitn(2, ':').collect();
        if parts.len() != 2 {
            anyhow::bail!(
                "Invalid key format. Expected 'key_id:base64_key', got: {}",
                if key_str.len() > 20 {
                    format!("{}...", &key_str[..20])
                } else {
                    key_str.to_string()
                }
            );
        }

        let key_id = parts[0].to_string();
        let key_bytes = BASE64
            .decode(parts[1])
            .context("Failed to decode key from base64")?;

        if key_bytes.len() != KEY_SIZE {
            anyhow::bail!(
                "Key must be {} bytes, got {} bytes for key_id '{}'",
                KEY_SIZE,
                key_bytes.len(),
                key_id
            );
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create cipher for key '{}': {}", key_id, e))?;

        Ok((key_id, cipher))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut dek_bytes = [0u8; DEK_SIZE];
        rand::thread_rng().fill_bytes(&mut dek_bytes);

        let mut dek_nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut dek_nonce_bytes);
        let dek_nonce = Nonce::from_slice(&dek_nonce_bytes);

        let wrapped_dek = self
            .primary_key
            .cipher
            .encrypt(dek_nonce, dek_bytes.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to wrap DEK: {}", e))?;

        let dek_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create DEK cipher: {}", e))?;

        let mut data_nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut data_nonce_bytes);
        let data_nonce = Nonce::from_slice(&data_nonce_bytes);

        let ciphertext = dek_cipher
            .encrypt(data_nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut dek_wrapped_bytes = Vec::with_capacity(NONCE_SIZE + wrapped_dek.len());
        dek_wrapped_bytes.extend_from_slice(&dek_nonce_bytes);
        dek_wrapped_bytes.extend_from_slice(&wrapped_dek);

        let payload = EncryptedPayload {
            version: PAYLOAD_VERSION,
            alg: ALGORITHM.to_string(),
            key_id: self.primary_key.id.clone(),
            dek_wrapped: BASE64.encode(&dek_wrapped_bytes),
            nonce: BASE64.encode(data_nonce_bytes),
            ciphertext: BASE64.encode(&ciphertext),
        };

        serde_json::to_vec(&payload).context("Failed to serialize encrypted payload")
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let payload: EncryptedPayload =
            serde_json::from_slice(data).context("Failed to parse encrypted payload")?;

        if payload.version != PAYLOAD_VERSION {
            anyhow::bail!(
                "Unsupported payload version: {} (expected {})",
                payload.version,
                PAYLOAD_VERSION
            );
        }
        if payload.alg != ALGORITHM {
            anyhow::bail!("Unsupported algorithm: {} (expected {})", payload.alg, ALGORITHM);
        }

        let kek_cipher = self.keys.get(&payload.key_id).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown key_id '{}'. Available keys: {:?}",
                payload.key_id,
                self.keys.keys().collect::<Vec<_>>()
            )
        })?;

        let dek_wrapped_bytes = BASE64
            .decode(&payload.dek_wrapped)
            .context("Failed to decode wrapped DEK")?;
        if dek_wrapped_bytes.len() < NONCE_SIZE {
            anyhow::bail!("Wrapped DEK too short");
        }

        let (dek_nonce_bytes, wrapped_dek) = dek_wrapped_bytes.split_at(NONCE_SIZE);
        let dek_nonce = Nonce::from_slice(dek_nonce_bytes);

        let dek_bytes = kek_cipher
            .decrypt(dek_nonce, wrapped_dek)
            .map_err(|e| anyhow::anyhow!("Failed to unwrap DEK: {}", e))?;
        if dek_bytes.len() != DEK_SIZE {
            anyhow::bail!("Invalid DEK size after unwrap");
        }

        let dek_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create DEK cipher: {}", e))?;

        let data_nonce_bytes = BASE64.decode(&payload.nonce).context("Failed to decode nonce")?;
        let data_nonce = Nonce::from_slice(&data_nonce_bytes);

        let ciphertext = BASE64
            .decode(&payload.ciphertext)
            .context("Failed to decode ciphertext")?;

        let plaintext = dek_cipher
            .decrypt(data_nonce, ciphertext.as_ref())
            .map_err(|e| anyhow::anyhow!("Decryption failed (data may be corrupted): {}", e))?;

        Ok(plaintext)
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<Vec<u8>> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_to_string(&self, data: &[u8]) -> Result<String> {
        let plaintext = self.decrypt(data)?;
        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }

    pub fn get_key_id(data: &[u8]) -> Result<String> {
        let payload: EncryptedPayload =
            serde_json::from_slice(data).context("Failed to parse encrypted payload")?;
        Ok(payload.key_id)
    }

    pub fn is_current_key(&self, data: &[u8]) -> Result<bool> {
        let key_id = Self::get_key_id(data)?;
        Ok(key_id == self.primary_key.id)
    }

    pub fn reencrypt(&self, data: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.is_current_key(data)? {
            return Ok(None);
        }
        let plaintext = self.decrypt(data)?;
        let new_ciphertext = self.encrypt(&plaintext)?;
        Ok(Some(new_ciphertext))
    }

    pub fn primary_key_id(&self) -> &str {
        &self.primary_key.id
    }
}

pub fn generate_encryption_key(key_id: &str) -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    format!("{}:{}", key_id, BASE64.encode(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(id: &str) -> String {
        generate_encryption_key(id)
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let service = EncryptionService::new(&test_key("kek-v1"), &[]).unwrap();
        let plaintext = "sk-test-api-key-12345";
        let encrypted = service.encrypt_string(plaintext).unwrap();
        assert_eq!(plaintext, service.decrypt_to_string(&encrypted).unwrap());
    }

    #[test]
    fn same_plaintext_yields_different_ciphertext() {
        let service = EncryptionService::new(&test_key("kek-v1"), &[]).unwrap();
        let a = service.encrypt_string("same").unwrap();
        let b = service.encrypt_string("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn key_rotation_keeps_old_ciphertext_decryptable() {
        let key_v1 = test_key("kek-v1");
        let key_v2 = test_key("kek-v2");

        let service_v1 = EncryptionService::new(&key_v1, &[]).unwrap();
        let encrypted_v1 = service_v1.encrypt_string("secret-data").unwrap();

        let service_v2 = EncryptionService::new(&key_v2, &[&key_v1]).unwrap();
        assert_eq!(service_v2.decrypt_to_string(&encrypted_v1).unwrap(), "secret-data");

        let encrypted_v2 = service_v2.encrypt_string("secret-data").unwrap();
        assert_eq!(EncryptionService::get_key_id(&encrypted_v2).unwrap(), "kek-v2");
    }

    #[test]
    fn reencrypt_is_idempotent_once_current() {
        let key_v1 = test_key("kek-v1");
        let key_v2 = test_key("kek-v2");

        let service_v1 = EncryptionService::new(&key_v1, &[]).unwrap();
        let encrypted_v1 = service_v1.encrypt_string("secret-data").unwrap();

        let service_v2 = EncryptionService::new(&key_v2, &[&key_v1]).unwrap();
        let encrypted_v2 = service_v2.reencrypt(&encrypted_v1).unwrap().unwrap();
        assert!(service_v2.reencrypt(&encrypted_v2).unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(EncryptionService::new("no-colon-here", &[]).is_err());
        assert!(EncryptionService::new("kek-v1:not-valid-base64!!!", &[]).is_err());
        let short_key = format!("kek-v1:{}", BASE64.encode([0u8; 16]));
        assert!(EncryptionService::new(&short_key, &[]).is_err());
    }
}
