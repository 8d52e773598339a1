//! Streaming, lazily-sorted object listing with subdirectory synthesis.

use rusqlite::{
    params,
    Connection,
};

/// One row of a listing response: either a live object or a synthesized
/// pseudo-directory collapsed from every object sharing a delimiter prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingRow {
    Object {
        name: String,
        created_at: f64,
        size: i64,
        content_type: String,
        etag: String,
    },
    Subdir {
        name: String,
    },
}

impl ListingRow {
    pub fn name(&self) -> &str {
        match self {
            ListingRow::Object { name, .. } => name,
            ListingRow::Subdir { name } => name,
        }
    }
}

/// Mirrors the reference server's listing contract: `marker` is exclusive,
/// `prefix` narrows the scan, `delimiter` collapses everything after the
/// first occurrence (past the prefix) into one pseudo-directory row, and
/// `path` (when set) is equivalent to `prefix = path + "/"` with `delimiter
/// = '/'` and additionally excludes nested objects entirely (they would
/// already be collapsed by the delimiter, so this only changes how deep
/// `name` may recurse through further slashes).
pub fn list_objects(
    conn: &Connection,
    limit: usize,
    marker: &str,
    prefix: &str,
    delimiter: Option<u8>,
    path: Option<&str>,
) -> anyhow::Result<Vec<ListingRow>> {
    let (effective_prefix, effective_delimiter) = match path {
        Some(p) if p.is_empty() => (String::new(), Some(b'/')),
        Some(p) => (format!("{p}/"), Some(b'/')),
        None => (prefix.to_string(), delimiter),
    };

    let like_pattern = format!("{}%", escape_like(&effective_prefix));
    let mut stmt = conn.prepare(
        "SELECT name, created_at, size, content_type, etag FROM object \
         WHERE deleted = 0 AND name > ?1 AND name LIKE ?2 ESCAPE '\\' \
         ORDER BY name ASC",
    )?;
    let mut rows = stmt.query_map(params![marker, like_pattern], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut out = Vec::with_capacity(limit.min(1024));
    // When a delimiter collapses a run of names into one pseudo-directory,
    // every subsequent name sharing that directory prefix is skipped
    // without a second SQL round-trip.
    let mut skip_below: Option<String> = None;

    while out.len() < limit {
        let Some(next) = rows.next() else { break };
        let (name, created_at, size, content_type, etag) = next?;

        if let Some(ref bound) = skip_below {
            if &name < bound {
                continue;
            }
            skip_below = None;
        }

        if let Some(delim) = effective_delimiter {
            let rest = &name[effective_prefix.len().min(name.len())..];
            if let Some(pos) = rest.as_bytes().iter().position(|&b| b == delim) {
                let subdir_end = effective_prefix.len() + pos + 1;
                let subdir_name = name[..subdir_end].to_string();
                out.push(ListingRow::Subdir {
                    name: subdir_name.clone(),
                });
                // Everything up to, but not including, the lexicographic
                // successor of this subdir prefix belongs to it.
                skip_below = Some(bump_prefix(&subdir_name));
                continue;
            }
        }

        out.push(ListingRow::Object {
            name,
            created_at,
            size,
            content_type,
            etag,
        });
    }

    Ok(out)
}

/// Smallest string that sorts strictly after every string with `prefix` as
/// a prefix, used to skip an entire subdirectory without re-querying.
fn bump_prefix(prefix: &str) -> String {
    format!("{prefix}\u{10FFFF}")
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || c == '%' || c == '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    fn seed(conn: &Connection, names: &[&str]) {
        conn.execute_batch(
            "CREATE TABLE object (name TEXT PRIMARY KEY, created_at REAL, size INTEGER, \
             content_type TEXT, etag TEXT, deleted INTEGER)",
        )
        .unwrap();
        for (i, name) in names.iter().enumerate() {
            conn.execute(
                "INSERT INTO object (name, created_at, size, content_type, etag, deleted) \
                 VALUES (?1, ?2, 1, 'text/plain', 'x', 0)",
                params![name, i as f64],
            )
            .unwrap();
        }
    }

    #[test]
    fn plain_listing_is_sorted_and_bounded_by_limit() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn, &["a", "c", "b"]);
        let rows = list_objects(&conn, 2, "", "", None, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name(), "a");
        assert_eq!(rows[1].name(), "b");
    }

    #[test]
    fn marker_is_exclusive() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn, &["a", "b", "c"]);
        let rows = list_objects(&conn, 10, "a", "", None, None).unwrap();
        assert_eq!(rows.iter().map(ListingRow::name).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn delimiter_collapses_shared_prefixes_into_one_subdir() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn, &["dir/a", "dir/b", "file"]);
        let rows = list_objects(&conn, 10, "", "", Some(b'/'), None).unwrap();
        assert_eq!(
            rows,
            vec![
                ListingRow::Subdir {
                    name: "dir/".to_string()
                },
                ListingRow::Object {
                    name: "file".to_string(),
                    created_at: 2.0,
                    size: 1,
                    content_type: "text/plain".to_string(),
                    etag: "x".to_string(),
                },
            ]
        );
    }

    #[test]
    fn path_forces_delimiter_and_prefix() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn, &["photos/a.jpg", "photos/sub/b.jpg", "other"]);
        let rows = list_objects(&conn, 10, "", "ignored", None, Some("photos")).unwrap();
        assert_eq!(
            rows,
            vec![
                ListingRow::Object {
                    name: "photos/a.jpg".to_string(),
                    created_at: 0.0,
                    size: 1,
                    content_type: "text/plain".to_string(),
                    etag: "x".to_string(),
                },
                ListingRow::Subdir {
                    name: "photos/sub/".to_string()
                },
            ]
        );
    }

    #[test]
    fn prefix_with_like_metacharacters_is_treated_literally() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn, &["50%_off", "50x_off"]);
        let rows = list_objects(&conn, 10, "", "50%_off", None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name(), "50%_off");
    }
}
