//! Known-good bytecode hashes and the transforms applied before hashing
//!
//! Deployed code legitimately differs between deployments (compiler
//! metadata, immutables such as the local domain). Each contract kind can
//! register transforms that erase those bytes; the result is hashed with
//! SHA-256 and compared against the kind's allow-list.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Rewrites code before it is hashed
pub type Transform = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Lowercase hex SHA-256 of `code`
pub fn bytecode_hash(code: &[u8]) -> String {
    hex::encode(Sha256::digest(code))
}

/// Drop the trailing CBOR metadata blob the Solidity compiler appends
///
/// The last two bytes hold the blob's big-endian length. Code too short to
/// carry the advertised blob is returned unchanged.
pub fn strip_solidity_metadata(code: &[u8]) -> Vec<u8> {
    if code.len() < 2 {
        return code.to_vec();
    }
    let tail = &code[code.len() - 2..];
    let metadata_len = u16::from_be_bytes([tail[0], tail[1]]) as usize + 2;
    if metadata_len > code.len() {
        return code.to_vec();
    }
    code[..code.len() - metadata_len].to_vec()
}

/// Zero `len` bytes starting at `offset`, clamped to the code length
pub fn mask_bytes(code: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut out = code.to_vec();
    let start = offset.min(out.len());
    let end = offset.saturating_add(len).min(out.len());
    out[start..end].fill(0);
    out
}

/// Allow-listed hashes and transforms per contract kind
#[derive(Clone, Default)]
pub struct BytecodeRules {
    known: HashMap<String, BTreeSet<String>>,
    transforms: HashMap<String, Vec<Transform>>,
}

impl fmt::Debug for BytecodeRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytecodeRules")
            .field("known", &self.known)
            .field(
                "transforms",
                &self.transforms.iter().map(|(k, v)| (k, v.len())).collect::<HashMap<_, _>>(),
            )
            .finish()
    }
}

impl BytecodeRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `hash` (lowercase hex SHA-256) for `kind`
    pub fn allow(mut self, kind: &str, hash: impl Into<String>) -> Self {
        self.known
            .entry(kind.to_string())
            .or_default()
            .insert(hash.into().to_lowercase());
        self
    }

    /// Apply `transform` to `kind`'s code before hashing; transforms run in
    /// registration order
    pub fn transform(mut self, kind: &str, transform: Transform) -> Self {
        self.transforms.entry(kind.to_string()).or_default().push(transform);
        self
    }

    pub fn strip_metadata(self, kind: &str) -> Self {
        self.transform(kind, Arc::new(strip_solidity_metadata))
    }

    pub fn mask(self, kind: &str, offset: usize, len: usize) -> Self {
        self.transform(kind, Arc::new(move |code: &[u8]| mask_bytes(code, offset, len)))
    }

    /// Whether any hash is allow-listed for `kind`
    pub fn covers(&self, kind: &str) -> bool {
        self.known.get(kind).is_some_and(|hashes| !hashes.is_empty())
    }

    /// Hash of `code` after `kind`'s transforms
    pub fn fingerprint(&self, kind: &str, code: &[u8]) -> String {
        let transformed = self
            .transforms
            .get(kind)
            .into_iter()
            .flatten()
            .fold(code.to_vec(), |code, transform| (**transform)(&code));
        bytecode_hash(&transformed)
    }

    /// `None` if nothing is allow-listed for `kind`, else whether `code` matches
    pub fn is_known(&self, kind: &str, code: &[u8]) -> Option<bool> {
        let hashes = self.known.get(kind).filter(|h| !h.is_empty())?;
        Some(hashes.contains(&self.fingerprint(kind, code)))
    }

    pub fn known_hashes(&self, kind: &str) -> Vec<String> {
        self.known
            .get(kind)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}
