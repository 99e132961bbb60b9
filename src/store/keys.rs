/// Key layout for the document partitions
///
/// Partition structure:
/// - `users`, `cvs`, `jobs`, `webhooks`, `deliveries`: `{id}` -> JSON document
/// - `versions`: `{cv_id}:{version_number:08}` -> JSON document
///   (the composite key is the `(cv_id, version_number)` uniqueness constraint)
/// - `generations`, `analyses`, `parsing_jobs`: `{job_id}` -> JSON document
///   (companions are 1:1 with their job)
/// - `indexes`: `version_id:{version_id}` -> versions-partition key
/// - `meta`: maintenance state (`last_prune`, ...)

/// Composite key for a version row: `{cv_id}:{version_number:08}`.
/// Zero-padding keeps lexicographic order equal to numeric order.
pub fn encode_version_key(cv_id: &str, version_number: u32) -> Vec<u8> {
    format!("{}:{:08}", cv_id, version_number).into_bytes()
}

/// Prefix for range-scanning all versions of a CV.
pub fn encode_version_prefix(cv_id: &str) -> Vec<u8> {
    format!("{}:", cv_id).into_bytes()
}

pub fn decode_version_key(key: &[u8]) -> Option<(String, u32)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (cv_id, number) = key_str.rsplit_once(':')?;
    Some((cv_id.to_string(), number.parse().ok()?))
}

/// Index entry mapping a version id to its composite key.
pub fn encode_version_id_index(version_id: &str) -> Vec<u8> {
    format!("version_id:{}", version_id).into_bytes()
}

/// Metadata key, e.g. `meta:last_prune`.
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_key_round_trip() {
        let key = encode_version_key("cv-1", 42);
        assert_eq!(key, b"cv-1:00000042");

        let (cv_id, number) = decode_version_key(&key).unwrap();
        assert_eq!(cv_id, "cv-1");
        assert_eq!(number, 42);
    }

    #[test]
    fn test_version_keys_sort_numerically() {
        let a = encode_version_key("cv-1", 2);
        let b = encode_version_key("cv-1", 10);
        assert!(a < b);
    }

    #[test]
    fn test_version_prefix() {
        assert_eq!(encode_version_prefix("cv-1"), b"cv-1:");
    }
}
