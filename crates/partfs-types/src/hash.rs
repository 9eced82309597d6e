//! Path hashing.
//!
//! Open files are identified by a 32-bit hash of their normalized path
//! rather than the path itself. The hash is djb2 (`h * 33 + byte`), which is
//! cheap on small cores and stable across builds. It is not collision free:
//! callers that need certainty must keep the path around to compare.

const DJB2_SEED: u32 = 5381;

/// Normalize a path inside a partition.
///
/// The result always starts with `/`, never ends with one (except for the
/// root itself), has no empty or `.` components, and has `..` resolved
/// lexically. `..` at the root stays at the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for part in &parts {
        normalized.push('/');
        normalized.push_str(part);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

fn djb2(bytes: &[u8]) -> u32 {
    bytes.iter().fold(DJB2_SEED, |hash, &b| {
        hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(u32::from(b))
    })
}

/// Hash a path. Paths that normalize to the same string hash equal.
pub fn hash_path(path: &str) -> u32 {
    hash_normalized(&normalize_path(path))
}

/// Hash a path the caller has already passed through [`normalize_path`].
pub fn hash_normalized(normalized: &str) -> u32 {
    djb2(normalized.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("a.txt"), "/a.txt");
        assert_eq!(normalize_path("//logs///boot.log/"), "/logs/boot.log");
        assert_eq!(normalize_path("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_path("/../../etc"), "/etc");
    }

    #[test]
    fn test_hash_is_deterministic() {
        let first = hash_path("/config/wifi.json");
        for _ in 0..100 {
            assert_eq!(hash_path("/config/wifi.json"), first);
        }
    }

    #[test]
    fn test_equivalent_paths_hash_equal() {
        assert_eq!(hash_path("/a/b.txt"), hash_path("a//b.txt"));
        assert_eq!(hash_path("/a/b.txt"), hash_path("/a/x/../b.txt/"));
    }

    #[test]
    fn test_known_values() {
        assert_eq!(djb2(b""), 5381);
        // 5381 * 33 + b'/'
        assert_eq!(hash_path("/"), 5381 * 33 + 47);
    }

    #[test]
    fn test_distinct_paths_can_collide() {
        // b*33 + 'A' == a*33 + 'b', and the shared prefix and suffix keep
        // the states equal.
        assert_ne!(normalize_path("/bA.txt"), normalize_path("/ab.txt"));
        assert_eq!(hash_path("/bA.txt"), hash_path("/ab.txt"));
    }

    #[test]
    fn test_distinct_paths_usually_differ() {
        assert_ne!(hash_path("/a.txt"), hash_path("/b.txt"));
        assert_ne!(hash_path("/logs/1"), hash_path("/logs/2"));
    }
}
