//! Maps an incoming request path to an on-disk container DB file, and
//! verifies the target device is actually mounted before anyone touches it.

mod mount;
mod parse;

pub use mount::MountGuard;
pub use parse::{
    parse_container_path,
    parse_replication_path,
    ContainerPath,
    ReplicationPath,
};

use std::path::{
    Path,
    PathBuf,
};

const DATA_DIR: &str = "containers";

/// Deterministic, filesystem-safe identifier for `(account, container)`.
///
/// 32 lowercase hex characters, matching the reference implementation's use
/// of a keyless MD5 digest over `"{account}/{container}"`. This is internal
/// plumbing: it never appears in the URL grammar, only in the path we compute
/// from already-parsed `account`/`container` segments.
pub fn hash_container(account: &str, container: &str) -> String {
    let digest = md5::compute(format!("{account}/{container}"));
    format!("{digest:x}")
}

/// `<devices_root>/<drive>/containers/<partition>/<hash_suffix>/<hash>/<hash>.db`
pub fn db_path(devices_root: &Path, drive: &str, partition: &str, hash: &str) -> PathBuf {
    let suffix = &hash[hash.len() - 3..];
    devices_root
        .join(drive)
        .join(DATA_DIR)
        .join(partition)
        .join(suffix)
        .join(hash)
        .join(format!("{hash}.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_32_lowercase_hex_chars() {
        let hash = hash_container("acct", "cont");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_is_deterministic_and_order_sensitive() {
        assert_eq!(hash_container("a", "b"), hash_container("a", "b"));
        assert_ne!(hash_container("a", "b"), hash_container("b", "a"));
    }

    #[test]
    fn db_path_uses_last_three_hex_chars_as_suffix() {
        let hash = hash_container("acct", "cont");
        let path = db_path(Path::new("/srv/node"), "sda", "42", &hash);
        let suffix = &hash[hash.len() - 3..];
        assert_eq!(
            path,
            Path::new("/srv/node")
                .join("sda")
                .join("containers")
                .join("42")
                .join(suffix)
                .join(&hash)
                .join(format!("{hash}.db"))
        );
    }
}
