//! Content-addressed submission identifiers.
//!
//! Grounded in the teacher crate's `data_url`/`aws` style of small, pure
//! leaf utilities. There is no precedent in the teacher for content hashing,
//! so this module is new, built with the same `sha2`/`hex` pairing the
//! other example repos (ktiyab-coheara, AmirTlinov-branchmind) use for
//! content-addressed storage keys.

use sha2::{Digest, Sha256};

/// A submission ID: either a top-level content hash, or a deterministic
/// child suffix derived from a parent ID.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    /// Derive the top-level submission ID: the 12-hex-character prefix of
    /// SHA-256 over the file bytes (spec.md §3).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        Self(hex::encode(digest)[..12].to_string())
    }

    /// Derive a page-child ID for a `BULK_SCANNED_BATCH` split.
    pub fn child_page(&self, page_index: usize) -> Self {
        Self(format!("{}_p{}", self.0, page_index))
    }

    /// Derive an entry-child ID for a multi-entry PDF split.
    pub fn child_entry(&self, entry_index: usize) -> Self {
        Self(format!("{}_e{}", self.0, entry_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SubmissionId> for String {
    fn from(id: SubmissionId) -> Self {
        id.0
    }
}

/// An opaque upload-batch grouping identifier. Not content-addressed: batches
/// are created by the caller, not derived from bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UploadBatchId(pub String);

/// An opaque identifier for the submitting user. Never derived; supplied by
/// the (out-of-scope) auth layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

/// A job-queue element identifier (spec.md §3: `Job.job_id`). Randomly
/// generated at enqueue time; unlike `SubmissionId` it is not content
/// addressed, since a job is an ephemeral queue element, not a durable
/// record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content-addressed prompt/input cache key, for the LLM response cache
/// (spec.md §9: "Cache LLM responses keyed by `(prompt_hash, input_hash)`").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub prompt_hash: String,
    pub input_hash: String,
}

impl CacheKey {
    pub fn new(prompt_text: &str, input_text: &str) -> Self {
        Self {
            prompt_hash: hex_sha256(prompt_text.as_bytes()),
            input_hash: hex_sha256(input_text.as_bytes()),
        }
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_id_is_deterministic() {
        let bytes = b"hello world";
        assert_eq!(SubmissionId::from_bytes(bytes), SubmissionId::from_bytes(bytes));
    }

    #[test]
    fn submission_id_is_twelve_hex_chars() {
        let id = SubmissionId::from_bytes(b"hello world");
        assert_eq!(id.0.len(), 12);
        assert!(id.0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn child_ids_are_suffixed_deterministically() {
        let parent = SubmissionId::from_bytes(b"parent bytes");
        assert_eq!(parent.child_page(3).0, format!("{}_p3", parent.0));
        assert_eq!(parent.child_entry(2).0, format!("{}_e2", parent.0));
    }

    #[test]
    fn cache_key_distinguishes_prompt_and_input() {
        let a = CacheKey::new("prompt", "input-1");
        let b = CacheKey::new("prompt", "input-2");
        assert_ne!(a.input_hash, b.input_hash);
        assert_eq!(a.prompt_hash, b.prompt_hash);
    }
}
