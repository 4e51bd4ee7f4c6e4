use sha2::{Digest, Sha256};

use crate::metadata::Metadata;

fn feed(hasher: &mut Sha256, chunk: &[u8]) {
    hasher.update((chunk.len() as u64).to_be_bytes());
    hasher.update(chunk);
}

/// Computes the hexadecimal digest of a metadata snapshot.
///
/// The digest covers the literal `version <n>` followed by every key and
/// value in key order. Each chunk is prefixed with its length (u64,
/// big-endian) so that no two distinct snapshots feed the same byte stream.
///
/// This framing is not the plain `key + " " + value` concatenation: the
/// identifiers produced here differ from those of any implementation that
/// hashes the unframed text, and cannot be compared with them.
pub fn metadata_digest(metadata: &Metadata, version: u32) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, format!("version {version}").as_bytes());
    for (key, value) in metadata {
        feed(&mut hasher, key.as_bytes());
        feed(&mut hasher, value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Derives the instance identifier `<title>-<digest>` for a snapshot.
pub fn compute_identifier(title: &str, metadata: &Metadata, version: u32) -> String {
    format!("{title}-{}", metadata_digest(metadata, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_carries_title_prefix() {
        let metadata: Metadata = [("seed", "7")].into_iter().collect();
        let id = compute_identifier("Sweep", &metadata, 1);
        assert!(id.starts_with("Sweep-"));
        assert_eq!(id.len(), "Sweep-".len() + 64);
    }

    #[test]
    fn version_participates_in_digest() {
        let metadata: Metadata = [("seed", "7")].into_iter().collect();
        assert_ne!(metadata_digest(&metadata, 1), metadata_digest(&metadata, 2));
    }

    #[test]
    fn split_point_between_key_and_value_matters() {
        let a: Metadata = [("a b", "c")].into_iter().collect();
        let b: Metadata = [("a", "b c")].into_iter().collect();
        assert_ne!(metadata_digest(&a, 1), metadata_digest(&b, 1));
    }

    #[test]
    fn chunks_are_length_framed() {
        let metadata: Metadata = [("seed", "7")].into_iter().collect();
        let mut hasher = Sha256::new();
        for chunk in ["version 1", "seed", "7"] {
            hasher.update((chunk.len() as u64).to_be_bytes());
            hasher.update(chunk.as_bytes());
        }
        assert_eq!(metadata_digest(&metadata, 1), hex::encode(hasher.finalize()));
    }

    #[test]
    fn empty_snapshot_is_stable() {
        let first = metadata_digest(&Metadata::new(), 1);
        let second = metadata_digest(&Metadata::new(), 1);
        assert_eq!(first, second);
    }
}
