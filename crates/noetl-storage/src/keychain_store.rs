// Scoped, TTL-bound, envelope-encrypted credential cache backed by
// `keychain` (migrations/0001_init.sql). Secrets are encrypted with
// `EncryptionService` before they ever reach the database; `get`
// transparently decrypts and treats an expired row as a cache miss so
// callers re-resolve through whatever issued the credential.

use async_trait::async_trait;
use chrono::Utc;
use noetl_core::error::{CoreError, Result};
use noetl_core::traits::{KeychainStore, ResolvedCredential};
use sqlx::PgPool;

use crate::encryption::EncryptionService;

pub struct PgKeychainStore {
    pool: PgPool,
    encryption: EncryptionService,
}

impl PgKeychainStore {
    pub fn new(pool: PgPool, encryption: EncryptionService) -> Self {
        Self { pool, encryption }
    }
}

#[async_trait]
impl KeychainStore for PgKeychainStore {
    async fn get(&self, catalog_id: i64, name: &str) -> Result<Option<ResolvedCredential>> {
        let row: Option<(Vec<u8>, Option<String>, Option<chrono::DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT encrypted_credential, token_type, expires_at
            FROM keychain
            WHERE catalog_id = $1 AND name = $2
            "#,
        )
        .bind(catalog_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Keychain(e.to_string()))?;

        let Some((encrypted, token_type, expires_at)) = row else {
            return Ok(None);
        };

        if let Some(expires_at) = expires_at {
            if expires_at <= Utc::now() {
                return Ok(None);
            }
        }

        let plaintext = self
            .encryption
            .decrypt(&encrypted)
            .map_err(|e| CoreError::Keychain(format!("failed to decrypt credential: {e}")))?;
        let secret: serde_json::Value = serde_json::from_slice(&plaintext)
            .map_err(|e| CoreError::Keychain(format!("malformed decrypted credential: {e}")))?;

        Ok(Some(ResolvedCredential {
            name: name.to_string(),
            secret,
            token_type,
        }))
    }

    async fn upsert(
        &self,
        catalog_id: i64,
        name: &str,
        credential: serde_json::Value,
        token_type: Option<String>,
        ttl_seconds: Option<i64>,
    ) -> Result<()> {
        let plaintext = serde_json::to_vec(&credential)
            .map_err(|e| CoreError::Keychain(format!("failed to serialize credential: {e}")))?;
        let encrypted = self
            .encryption
            .encrypt(&plaintext)
            .map_err(|e| CoreError::Keychain(format!("failed to encrypt credential: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO keychain (catalog_id, name, token_type, encrypted_credential, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (catalog_id, name) DO UPDATE
            SET token_type = EXCLUDED.token_type,
                encrypted_credential = EXCLUDED.encrypted_credential,
                expires_at = EXCLUDED.expires_at,
                updated_at = now()
            "#,
        )
        .bind(catalog_id)
        .bind(name)
        .bind(token_type)
        .bind(encrypted)
        .bind(ttl_seconds.map(|s| Utc::now() + chrono::Duration::seconds(s)))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Keychain(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_none_means_no_expiry() {
        let expires_at: Option<chrono::DateTime<Utc>> = None::<i64>.map(|s: i64| Utc::now() + chrono::Duration::seconds(s));
        assert!(expires_at.is_none());
    }
}
