//! Namespace-scoped document storage, encrypted at rest.
//!
//! Document bytes pass through a `DataEncryptor` before they reach DuckDB.
//! Content hashes are computed on the *plaintext* so dedup checks remain
//! valid across key rotations. A row that fails to decrypt is an error;
//! stored ciphertext is never handed back as if it were plaintext.

use crate::SharedConnection;
use crate::error::{StorageError, StorageResult};
use chrono::Utc;
use docvault_crypto::{DataEncryptor, EncryptionKey};
use duckdb::{Connection, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub namespace: String,
    pub document_id: String,
    /// Plaintext size in bytes.
    pub size: i64,
    /// Hex SHA-256 of the plaintext.
    pub content_hash: String,
    pub content_type: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

pub struct DocumentStore {
    conn: SharedConnection,
    encryptor: Arc<dyn DataEncryptor>,
}

impl DocumentStore {
    /// Open with an existing shared connection.
    pub fn open_with_conn(
        conn: SharedConnection,
        encryptor: Arc<dyn DataEncryptor>,
    ) -> StorageResult<Self> {
        let store = Self { conn, encryptor };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Open in-memory.
    pub fn open_in_memory(encryptor: Arc<dyn DataEncryptor>) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)), encryptor)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))
    }

    fn ensure_tables(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                namespace VARCHAR NOT NULL,
                document_id VARCHAR NOT NULL,
                data BLOB NOT NULL,
                size BIGINT NOT NULL DEFAULT 0,
                content_hash VARCHAR NOT NULL,
                content_type VARCHAR,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL,
                PRIMARY KEY (namespace, document_id)
            );",
        )?;
        Ok(())
    }

    /// Store a document, replacing any previous version.
    pub fn store(
        &self,
        namespace: &str,
        id: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> StorageResult<DocumentMetadata> {
        let content_hash = hex::encode(Sha256::digest(data));
        let now = Utc::now().timestamp_millis();

        // Encrypt under the connection lock: `re_encrypt_all` needs the same
        // lock, so a rotation either sees this row or runs before the frame
        // is produced.
        let conn = self.lock()?;
        let encrypted = self.encryptor.encrypt_bytes(data)?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (namespace, document_id, data, size, content_hash, content_type, created_at, modified_at)
             VALUES (?, ?, ?, ?, ?, ?, COALESCE((SELECT created_at FROM documents WHERE namespace = ? AND document_id = ?), ?), ?)",
            params![namespace, id, encrypted, data.len() as i64, content_hash, content_type, namespace, id, now, now],
        )?;
        debug!("stored document {namespace}/{id} ({} bytes)", data.len());

        Self::query_metadata(&conn, namespace, id)
    }

    /// Read and decrypt a document.
    pub fn read(&self, namespace: &str, id: &str) -> StorageResult<Vec<u8>> {
        let conn = self.lock()?;
        let raw: Vec<u8> = conn
            .query_row(
                "SELECT data FROM documents WHERE namespace = ? AND document_id = ?",
                params![namespace, id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                duckdb::Error::QueryReturnedNoRows => {
                    StorageError::NotFound(namespace.to_string(), id.to_string())
                }
                other => other.into(),
            })?;

        // Same lock as the read, so the frame cannot be rotated underneath us.
        Ok(self.encryptor.decrypt_bytes(&raw)?)
    }

    /// Metadata for a single document.
    pub fn metadata(&self, namespace: &str, id: &str) -> StorageResult<DocumentMetadata> {
        let conn = self.lock()?;
        Self::query_metadata(&conn, namespace, id)
    }

    fn query_metadata(conn: &Connection, namespace: &str, id: &str) -> StorageResult<DocumentMetadata> {
        conn.query_row(
            "SELECT namespace, document_id, size, content_hash, content_type, created_at, modified_at
             FROM documents WHERE namespace = ? AND document_id = ?",
            params![namespace, id],
            row_to_metadata,
        )
        .map_err(|e| match e {
            duckdb::Error::QueryReturnedNoRows => {
                StorageError::NotFound(namespace.to_string(), id.to_string())
            }
            other => other.into(),
        })
    }

    /// Delete a document.
    pub fn delete(&self, namespace: &str, id: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "DELETE FROM documents WHERE namespace = ? AND document_id = ?",
            params![namespace, id],
        )?;

        if affected == 0 {
            return Err(StorageError::NotFound(namespace.to_string(), id.to_string()));
        }
        Ok(())
    }

    /// List document metadata for a namespace, most recently modified first.
    pub fn list(&self, namespace: &str) -> StorageResult<Vec<DocumentMetadata>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT namespace, document_id, size, content_hash, content_type, created_at, modified_at
             FROM documents WHERE namespace = ? ORDER BY modified_at DESC, document_id",
        )?;

        let items = stmt
            .query_map(params![namespace], row_to_metadata)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Re-encrypt every document from `old_key` to `new_key`.
    ///
    /// Runs in a single transaction: either every row moves to the new key
    /// or none does. Called by the key manager while it holds the rotation
    /// lock, so it works on raw keys rather than through the encryptor.
    pub fn re_encrypt_all(
        &self,
        old_key: &EncryptionKey,
        new_key: &EncryptionKey,
    ) -> StorageResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let rows: Vec<(String, String, Vec<u8>)> = {
            let mut stmt = tx.prepare("SELECT namespace, document_id, data FROM documents")?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?
        };

        for (namespace, id, raw) in &rows {
            let plaintext = docvault_crypto::decrypt(old_key.as_bytes(), raw)?;
            let re = docvault_crypto::encrypt(new_key.as_bytes(), &plaintext)?;
            tx.execute(
                "UPDATE documents SET data = ? WHERE namespace = ? AND document_id = ?",
                params![re, namespace, id],
            )?;
        }

        tx.commit()?;
        info!("re-encrypted {} documents under rotated key", rows.len());
        Ok(rows.len())
    }

    /// Whether `key` decrypts the stored documents.
    ///
    /// Checks the first document by decrypting it and comparing the
    /// plaintext hash, so a lucky padding match does not count. Returns
    /// `None` when there is nothing stored to check against.
    pub fn key_opens_data(&self, key: &EncryptionKey) -> StorageResult<Option<bool>> {
        let conn = self.lock()?;
        let sample = conn.query_row(
            "SELECT data, content_hash FROM documents ORDER BY namespace, document_id LIMIT 1",
            [],
            |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
        );

        match sample {
            Ok((raw, content_hash)) => {
                let opens = docvault_crypto::decrypt(key.as_bytes(), &raw)
                    .is_ok_and(|plain| hex::encode(Sha256::digest(&plain)) == content_hash);
                Ok(Some(opens))
            }
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn row_to_metadata(row: &duckdb::Row<'_>) -> duckdb::Result<DocumentMetadata> {
    Ok(DocumentMetadata {
        namespace: row.get(0)?,
        document_id: row.get(1)?,
        size: row.get(2)?,
        content_hash: row.get(3)?,
        content_type: row.get(4)?,
        created_at: row.get(5)?,
        modified_at: row.get(6)?,
    })
}
