//! The security core service object.
//!
//! [`SecurityCore`] owns the device key manager, the encrypted document
//! store, the audit service and an optional backup transport. Every
//! sensitive operation is reported to the audit service after it runs,
//! with its outcome. Audit failures are logged and never fail the
//! operation itself.

use crate::config::VaultConfig;
use crate::error::{CoreError, CoreResult};
use docvault_audit::{
    AuditAction, AuditEntry, AuditEntryId, AuditLevel, AuditQuery, AuditRecord, AuditRecordStore,
    AuditService, ChainVerificationResult, DuckDbAuditStore,
};
use docvault_cloud::{BlobTransport, RemoteBlob, S3Transport};
use docvault_crypto::{KdfParams, export_blob_with_params, import_blob_with_params};
use docvault_keys::{DuckDbKeyStore, KeyManager, PassphraseKeyStore, SecureKeyStore};
use docvault_storage::{DocumentMetadata, DocumentStore, SharedConnection, open_shared};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

const DOCUMENT: &str = "document";
const BACKUP: &str = "backup";
const KEY: &str = "key";

pub struct SecurityCore {
    keys: Arc<KeyManager>,
    documents: DocumentStore,
    audit: AuditService,
    transport: Option<Arc<dyn BlobTransport>>,
    kdf: KdfParams,
}

impl SecurityCore {
    /// Opens every store in the configured DuckDB database and, when a
    /// cloud section is present, an S3 transport.
    ///
    /// The device key shares the database file with the documents, so it
    /// is stored wrapped under a key derived from `passphrase`. The first
    /// open of a fresh database sets the passphrase; later opens fail with
    /// [`KeyError::WrongPassphrase`](docvault_keys::KeyError::WrongPassphrase)
    /// if it does not match. Call [`init`](Self::init) before use.
    pub fn open(config: &VaultConfig, passphrase: &str) -> CoreResult<Self> {
        config.validate()?;
        let conn = open_shared(
            &config.database_path,
            &config.duckdb_memory_limit,
            config.duckdb_threads,
        )?;

        let raw_keys = Arc::new(DuckDbKeyStore::open_with_conn(conn.clone())?);
        let key_store: Arc<dyn SecureKeyStore> = Arc::new(PassphraseKeyStore::unlock(
            raw_keys,
            passphrase,
            &config.kdf_params()?,
        )?);
        let audit_store: Arc<dyn AuditRecordStore> =
            Arc::new(DuckDbAuditStore::open_with_conn(conn.clone())?);
        let transport: Option<Arc<dyn BlobTransport>> = match &config.cloud {
            Some(cloud) => Some(Arc::new(S3Transport::new(cloud.clone())?)),
            None => None,
        };

        info!(path = %config.database_path.display(), "opened vault database");
        Self::with_components(config, conn, key_store, audit_store, transport)
    }

    /// Assembles the core from explicit collaborators.
    pub fn with_components(
        config: &VaultConfig,
        conn: SharedConnection,
        key_store: Arc<dyn SecureKeyStore>,
        audit_store: Arc<dyn AuditRecordStore>,
        transport: Option<Arc<dyn BlobTransport>>,
    ) -> CoreResult<Self> {
        let keys = Arc::new(KeyManager::new(key_store, config.key_id.clone()));
        let documents = DocumentStore::open_with_conn(conn, keys.clone())?;
        let audit = AuditService::new(audit_store, config.audit.clone());

        Ok(Self {
            keys,
            documents,
            audit,
            transport,
            kdf: config.kdf_params()?,
        })
    }

    /// Loads (or creates) the device key and starts the audit service.
    ///
    /// A key left staged by an interrupted rotation is promoted if the
    /// stored documents are already under it. Returns the result of the
    /// startup chain verification.
    pub fn init(&self) -> CoreResult<ChainVerificationResult> {
        self.keys.init_checked(|key| self.documents.key_opens_data(key))?;
        let verification = self.audit.init()?;
        info!(
            key_version = ?self.keys.key_version(),
            audit_entries = verification.entries_verified,
            "security core initialized"
        );
        Ok(verification)
    }

    /// Stops the audit service and drops the in-memory device key.
    pub fn shutdown(&self) {
        self.audit.shutdown();
        self.keys.shutdown();
        info!("security core shut down");
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Reports `result` to the audit trail and passes it through unchanged.
    fn audited<T, E: Display>(
        &self,
        level: AuditLevel,
        record: AuditRecord,
        result: Result<T, E>,
    ) -> Result<T, E> {
        let record = match &result {
            Ok(_) => record,
            Err(e) => record.failed(e.to_string()),
        };
        self.audit.record_best_effort(level, record);
        result
    }

    // -- Documents --

    pub fn save_document(
        &self,
        namespace: &str,
        id: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> CoreResult<DocumentMetadata> {
        let result = self.documents.store(namespace, id, data, content_type);
        let record = AuditRecord::new(AuditAction::Write, DOCUMENT, doc_ref(namespace, id))
            .details(format!("{} bytes", data.len()));
        Ok(self.audited(AuditLevel::Compulsory, record, result)?)
    }

    pub fn load_document(&self, namespace: &str, id: &str) -> CoreResult<Vec<u8>> {
        let result = self.documents.read(namespace, id);
        let record = AuditRecord::new(AuditAction::Read, DOCUMENT, doc_ref(namespace, id));
        Ok(self.audited(AuditLevel::Info, record, result)?)
    }

    pub fn delete_document(&self, namespace: &str, id: &str) -> CoreResult<()> {
        let result = self.documents.delete(namespace, id);
        let record = AuditRecord::new(AuditAction::Delete, DOCUMENT, doc_ref(namespace, id));
        Ok(self.audited(AuditLevel::Compulsory, record, result)?)
    }

    pub fn list_documents(&self, namespace: &str) -> CoreResult<Vec<DocumentMetadata>> {
        let result = self.documents.list(namespace);
        let record = AuditRecord::new(AuditAction::Read, DOCUMENT, format!("{namespace}/*"));
        Ok(self.audited(AuditLevel::Verbose, record, result)?)
    }

    // -- Portable export/import --

    /// Produces a password-protected blob of a stored document.
    pub fn export_document(&self, namespace: &str, id: &str, password: &str) -> CoreResult<Vec<u8>> {
        let result = self.export_inner(namespace, id, password);
        let record = AuditRecord::new(AuditAction::Export, DOCUMENT, doc_ref(namespace, id));
        self.audited(AuditLevel::Compulsory, record, result)
    }

    fn export_inner(&self, namespace: &str, id: &str, password: &str) -> CoreResult<Vec<u8>> {
        let plaintext = self.documents.read(namespace, id)?;
        Ok(export_blob_with_params(&plaintext, password, &self.kdf)?)
    }

    /// Stores the contents of a blob produced by [`export_document`](Self::export_document).
    ///
    /// A wrong password is usually reported as a decryption failure but can
    /// also yield garbage, which would then be stored as the document.
    pub fn import_document(
        &self,
        namespace: &str,
        id: &str,
        blob: &[u8],
        password: &str,
    ) -> CoreResult<DocumentMetadata> {
        let result = self.import_inner(namespace, id, blob, password);
        let record = AuditRecord::new(AuditAction::Import, DOCUMENT, doc_ref(namespace, id));
        self.audited(AuditLevel::Compulsory, record, result)
    }

    fn import_inner(
        &self,
        namespace: &str,
        id: &str,
        blob: &[u8],
        password: &str,
    ) -> CoreResult<DocumentMetadata> {
        let plaintext = import_blob_with_params(blob, password, &self.kdf)?;
        Ok(self.documents.store(namespace, id, &plaintext, None)?)
    }

    // -- Key lifecycle --

    /// Replaces the device key and re-encrypts every stored document.
    ///
    /// Returns the new key version. On failure the old key stays active and
    /// no document changes.
    pub fn rotate_key(&self) -> CoreResult<u64> {
        let result = self
            .keys
            .change_key(|old, new| self.documents.re_encrypt_all(old, new).map(|_| ()));
        let record = AuditRecord::new(AuditAction::KeyRotate, KEY, self.keys.key_id());
        Ok(self.audited(AuditLevel::Compulsory, record, result)?)
    }

    /// Destroys the device key. Stored documents become unreadable.
    pub fn clear_key(&self) -> CoreResult<()> {
        let result = self.keys.clear_key();
        let record = AuditRecord::new(AuditAction::KeyClear, KEY, self.keys.key_id());
        Ok(self.audited(AuditLevel::Compulsory, record, result)?)
    }

    // -- Remote backups --

    fn transport(&self) -> CoreResult<&Arc<dyn BlobTransport>> {
        self.transport.as_ref().ok_or(CoreError::NoTransport)
    }

    /// Exports a document and uploads the blob. Returns the remote id.
    pub async fn backup_document(&self, namespace: &str, id: &str, password: &str) -> CoreResult<String> {
        let result = self.backup_inner(namespace, id, password).await;
        let mut record = AuditRecord::new(AuditAction::Export, DOCUMENT, doc_ref(namespace, id));
        if let Ok(remote_id) = &result {
            record = record.details(format!("remote:{remote_id}"));
        }
        self.audited(AuditLevel::Compulsory, record, result)
    }

    async fn backup_inner(&self, namespace: &str, id: &str, password: &str) -> CoreResult<String> {
        let transport = self.transport()?;
        let blob = self.export_inner(namespace, id, password)?;
        let remote_id = transport.upload(blob).await?;
        debug!("backed up {namespace}/{id} as {remote_id}");
        Ok(remote_id)
    }

    /// Downloads a backup and stores it as `namespace`/`id`.
    pub async fn restore_document(
        &self,
        remote_id: &str,
        password: &str,
        namespace: &str,
        id: &str,
    ) -> CoreResult<DocumentMetadata> {
        let result = self.restore_inner(remote_id, password, namespace, id).await;
        let record = AuditRecord::new(AuditAction::Import, DOCUMENT, doc_ref(namespace, id))
            .details(format!("remote:{remote_id}"));
        self.audited(AuditLevel::Compulsory, record, result)
    }

    async fn restore_inner(
        &self,
        remote_id: &str,
        password: &str,
        namespace: &str,
        id: &str,
    ) -> CoreResult<DocumentMetadata> {
        let blob = self.transport()?.download(remote_id).await?;
        self.import_inner(namespace, id, &blob, password)
    }

    pub async fn list_backups(&self) -> CoreResult<Vec<RemoteBlob>> {
        Ok(self.transport()?.list().await?)
    }

    pub async fn delete_backup(&self, remote_id: &str) -> CoreResult<()> {
        let result = match self.transport() {
            Ok(transport) => transport.delete(remote_id).await.map_err(CoreError::from),
            Err(e) => Err(e),
        };
        let record = AuditRecord::new(AuditAction::Delete, BACKUP, remote_id);
        self.audited(AuditLevel::Compulsory, record, result)
    }

    // -- Audit --

    pub fn audit_query(&self, query: &AuditQuery) -> CoreResult<Vec<AuditEntry>> {
        Ok(self.audit.query(query)?)
    }

    /// Ids of every audit entry that fails integrity verification.
    pub fn verify_audit(&self) -> CoreResult<Vec<AuditEntryId>> {
        Ok(self.audit.verify()?)
    }

    pub fn verify_audit_detailed(&self) -> CoreResult<ChainVerificationResult> {
        Ok(self.audit.verify_detailed()?)
    }
}

fn doc_ref(namespace: &str, id: &str) -> String {
    format!("{namespace}/{id}")
}
