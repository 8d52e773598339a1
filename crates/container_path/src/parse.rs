use errors::ErrorMetadata;

/// `(drive, partition, account, container, object?)`, decoded from a
/// `/<drive>/<partition>/<account>/<container>[/<object>]` request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPath {
    pub drive: String,
    pub partition: String,
    pub account: String,
    pub container: String,
    pub object: Option<String>,
}

/// `(drive, partition, hash)`, decoded from a `/<drive>/<partition>/<hash>`
/// replication POST path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPath {
    pub drive: String,
    pub partition: String,
    pub hash: String,
}

pub fn parse_container_path(raw_path: &str) -> anyhow::Result<ContainerPath> {
    let segs = split_path(raw_path, 4, 5)?;
    let mut segs = segs.into_iter();
    Ok(ContainerPath {
        drive: segs.next().expect("length checked by split_path"),
        partition: segs.next().expect("length checked by split_path"),
        account: segs.next().expect("length checked by split_path"),
        container: segs.next().expect("length checked by split_path"),
        object: segs.next(),
    })
}

pub fn parse_replication_path(raw_path: &str) -> anyhow::Result<ReplicationPath> {
    let segs = split_path(raw_path, 3, 3)?;
    let mut segs = segs.into_iter();
    Ok(ReplicationPath {
        drive: segs.next().expect("length checked by split_path"),
        partition: segs.next().expect("length checked by split_path"),
        hash: segs.next().expect("length checked by split_path"),
    })
}

/// Splits a request path into `min..=max` non-empty, URL-decoded segments.
///
/// Mirrors the reference server's `split_path`: a leading slash is stripped,
/// segments are decoded independently, and any segment that decodes to
/// containing `/` (e.g. a client sending `%2F`) or that is empty is a bad
/// request, not a routing miss.
fn split_path(raw_path: &str, min: usize, max: usize) -> anyhow::Result<Vec<String>> {
    let trimmed = raw_path.strip_prefix('/').unwrap_or(raw_path);
    let segs: Vec<String> = if trimmed.is_empty() {
        vec![]
    } else {
        trimmed
            .split('/')
            .map(|seg| {
                urlencoding::decode(seg)
                    .map(|s| s.into_owned())
                    .map_err(|e| anyhow::anyhow!(e))
            })
            .collect::<anyhow::Result<_>>()?
    };

    if segs.len() < min || segs.len() > max {
        anyhow::bail!(ErrorMetadata::bad_request(
            "InvalidPath",
            format!(
                "Invalid path: expected {} to {} segments, got {}",
                min,
                max,
                segs.len()
            ),
        ));
    }
    for seg in &segs {
        if seg.is_empty() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidPath",
                "Invalid path: segments must not be empty",
            ));
        }
        if seg.contains('/') {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidPath",
                "Invalid path: segment must not contain '/'",
            ));
        }
    }
    Ok(segs)
}
