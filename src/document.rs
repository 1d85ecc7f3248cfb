//! Immutable document ledger and signature slots.
//!
//! Documents are generated in two phases because the artifact embeds its own
//! verification marker: draft bytes are rendered without the marker, hashed,
//! and the final bytes are re-rendered with the hash-derived reference before
//! being stored and locked. A locked document never changes; every read
//! re-verifies the stored hash against the stored bytes.

use crate::error::{Error, Result};
use crate::roles::Role;
use crate::utils::{TimeStamp, to_cbor};
use chrono::Utc;
use sled::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum DocumentKind {
    #[n(0)]
    LetterOfOrder,
    #[n(1)]
    Report,
}

impl DocumentKind {
    pub fn slug(&self) -> &'static str {
        match self {
            DocumentKind::LetterOfOrder => "letter_of_order",
            DocumentKind::Report => "report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Document {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub kind: DocumentKind,
    #[n(2)]
    pub subject_ids: Vec<String>,
    #[n(3)]
    pub template: String,
    /// Blob path of the final bytes; set together with the hashes and lock.
    #[n(4)]
    pub path: Option<String>,
    /// Fingerprint of the stored (final) bytes, checked on every read.
    #[n(5)]
    pub document_hash: Option<String>,
    /// Draft-bytes hash, embedded in the artifact as its verification marker.
    #[n(6)]
    pub verify_code: Option<String>,
    #[n(7)]
    pub locked: bool,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
    #[n(9)]
    pub finalized_at: Option<TimeStamp<Utc>>,
}

impl Document {
    pub fn new(id: String, kind: DocumentKind, subject_ids: Vec<String>, template: String) -> Self {
        Self {
            id,
            kind,
            subject_ids,
            template,
            path: None,
            document_hash: None,
            verify_code: None,
            locked: false,
            created_at: TimeStamp::new(),
            finalized_at: None,
        }
    }

    /// Deterministic serialization of the material fields. This is what
    /// rendering and signature hashing see; storage paths and lock state are
    /// deliberately excluded.
    pub fn canonical_payload(&self) -> Result<Vec<u8>> {
        let material = (
            self.id.as_str(),
            self.kind.slug(),
            &self.subject_ids,
            self.template.as_str(),
        );
        to_cbor(&material)
    }
}

/// Summary exposed by public hash verification. Locked documents only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub document_id: String,
    pub kind: DocumentKind,
    pub subject_ids: Vec<String>,
    pub document_hash: String,
    pub verify_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub summary: Option<DocumentSummary>,
}

impl Verification {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            summary: None,
        }
    }
}

/// One signature slot per (document, role).
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Signature {
    #[n(0)]
    pub document_id: String,
    #[n(1)]
    pub role: Role,
    #[n(2)]
    pub signer_id: String,
    #[n(3)]
    pub signed_at: TimeStamp<Utc>,
    #[n(4)]
    pub payload_hash: String,
}

impl Signature {
    pub fn slot_key(document_id: &str, role: Role) -> String {
        format!("{document_id}/{}", role.code())
    }

    /// Hash over the canonical document payload plus the slot and signer, so
    /// two signatures on the same document never collide.
    pub fn sign(document: &Document, role: Role, signer_id: &str) -> Result<Self> {
        let mut payload = document.canonical_payload()?;
        payload.extend_from_slice(role.code().as_bytes());
        payload.extend_from_slice(signer_id.as_bytes());
        Ok(Self {
            document_id: document.id.clone(),
            role,
            signer_id: signer_id.to_string(),
            signed_at: TimeStamp::new(),
            payload_hash: sha256::digest(&payload),
        })
    }
}

/// Rendering backend seam. Treated as a pure function of (template, payload)
/// for hashing purposes; the engine never inspects the bytes it returns.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, payload: &[u8], verify_marker: Option<&str>)
    -> Result<Vec<u8>>;
}

/// Deterministic renderer used as the default backend. Concatenates the
/// template reference, payload and optional marker into a stable byte layout.
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(
        &self,
        template: &str,
        payload: &[u8],
        verify_marker: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(template.len() + payload.len() + 64);
        out.extend_from_slice(template.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(payload);
        if let Some(marker) = verify_marker {
            out.push(b'\n');
            out.extend_from_slice(marker.as_bytes());
        }
        Ok(out)
    }
}

/// Byte storage seam: store/exists/get with byte-identity round-tripping.
pub trait BlobStore: Send + Sync {
    fn store(&self, path: &str, bytes: &[u8]) -> Result<()>;
    fn exists(&self, path: &str) -> Result<bool>;
    fn get(&self, path: &str) -> Result<Vec<u8>>;
}

/// Blob store over a sled tree.
pub struct TreeBlobStore {
    tree: Tree,
}

impl TreeBlobStore {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Number of stored blobs, used by tests to assert write-once behavior.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl BlobStore for TreeBlobStore {
    fn store(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.tree.insert(path.as_bytes(), bytes)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.tree.contains_key(path.as_bytes())?)
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        match self.tree.get(path.as_bytes())? {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(Error::NotFound {
                entity: "blob",
                id: path.to_string(),
            }),
        }
    }
}
