//! Content hashes and deterministic record ids
//!
//! Digests are blake3 over length-delimited parts, rendered as hex. Record
//! ids derived from a digest are UUIDv5 so they are valid Qdrant point ids.

use uuid::Uuid;

fn digest(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Stable UUID for a hex digest
pub fn uuid_from_digest(hex: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, hex.as_bytes()).to_string()
}

/// Hash of a record's namespace and content
pub fn hash_document(namespace: &str, content: &str) -> String {
    digest(&[namespace, content])
}

/// Hash of a caller-supplied external key
pub fn hash_external_id(namespace: &str, external_id: &str) -> String {
    digest(&["external_id", namespace, external_id])
}

/// Record id for one chunk of a document
pub fn record_id_for_chunk(
    namespace: &str,
    document_id: &str,
    chunk_index: usize,
    chunk_text: &str,
) -> String {
    let index = chunk_index.to_string();
    uuid_from_digest(&digest(&[namespace, document_id, &index, chunk_text]))
}

/// Vector store point id for a record id.
///
/// UUID-shaped record ids are used as-is (canonical form); anything else is
/// mapped to a UUIDv5 of the id.
pub fn point_id_for_record(record_id: &str) -> String {
    match Uuid::parse_str(record_id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes()).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_hash_is_stable_hex() {
        let a = hash_document("ns1", "hello world");
        let b = hash_document("ns1", "hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, hash_document("ns2", "hello world"));
    }

    #[test]
    fn test_parts_are_delimited() {
        assert_ne!(hash_document("ab", "c"), hash_document("a", "bc"));
        assert_ne!(hash_external_id("ns", "x"), hash_document("ns", "x"));
    }

    #[test]
    fn test_chunk_ids_depend_on_every_input() {
        let base = record_id_for_chunk("ns", "doc", 0, "text");
        assert_eq!(base, record_id_for_chunk("ns", "doc", 0, "text"));
        assert!(Uuid::parse_str(&base).is_ok());

        assert_ne!(base, record_id_for_chunk("ns2", "doc", 0, "text"));
        assert_ne!(base, record_id_for_chunk("ns", "doc2", 0, "text"));
        assert_ne!(base, record_id_for_chunk("ns", "doc", 1, "text"));
        assert_ne!(base, record_id_for_chunk("ns", "doc", 0, "text2"));
    }

    #[test]
    fn test_point_id_mapping() {
        let uuid = "6F9619FF-8B86-D011-B42D-00C04FC964FF";
        assert_eq!(
            point_id_for_record(uuid),
            "6f9619ff-8b86-d011-b42d-00c04fc964ff"
        );

        let mapped = point_id_for_record("order-42");
        assert!(Uuid::parse_str(&mapped).is_ok());
        assert_eq!(mapped, point_id_for_record("order-42"));
    }
}
