//! SF-011: BLAKE3 fingerprints for workflow documents.

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Fingerprint of a workflow document. Line endings are normalized so the
/// same script checked out on different platforms hashes identically.
pub fn fingerprint_document(content: &str) -> String {
    if content.contains("\r\n") {
        hash_string(&content.replace("\r\n", "\n"))
    } else {
        hash_string(content)
    }
}
