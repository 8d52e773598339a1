//! Dispatches a single replication RPC body to one of a small, closed set
//! of broker primitives. Only the wire contract lives here; the algorithm
//! that decides which rows to exchange belongs to a peer replicator that is
//! out of scope for this service.

use container_broker::{
    ContainerBroker,
    MergeRow,
};
use errors::ErrorMetadata;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireRow {
    name: String,
    created_at: f64,
    size: i64,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    etag: String,
    #[serde(default)]
    deleted: bool,
}

impl From<WireRow> for MergeRow {
    fn from(row: WireRow) -> Self {
        MergeRow {
            name: row.name,
            created_at: row.created_at,
            size: row.size,
            content_type: row.content_type,
            etag: row.etag,
            deleted: row.deleted,
        }
    }
}

/// Parses `body` and applies it to `broker`, returning the JSON value to
/// emit back to the peer verbatim.
pub fn dispatch(broker: &ContainerBroker, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let request: RpcRequest = serde_json::from_value(body.clone())
        .map_err(|e| ErrorMetadata::bad_request("InvalidRpcBody", format!("malformed RPC body: {e}")))?;

    let outcome = match request.method.as_str() {
        "sync" => sync(broker, &request.args),
        "merge_items" => merge_items(broker, &request.args),
        "merge_syncpoint" => merge_syncpoint(broker, &request.args),
        other => Err(anyhow::anyhow!(ErrorMetadata::bad_request(
            "UnknownRpcMethod",
            format!("unknown replication method '{other}'"),
        ))),
    };

    let label = if outcome.is_ok() { "ok" } else { "error" };
    metrics::REPLICATION_RPC_TOTAL
        .with_label_values(&[&request.method, label])
        .inc();
    outcome
}

fn sync(broker: &ContainerBroker, args: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let remote_id = args
        .get(0)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ErrorMetadata::bad_request("InvalidRpcArgs", "sync requires [remote_id]"))?;
    let info = broker.get_info()?;
    let sync_point = broker.get_sync(remote_id)?;
    Ok(serde_json::json!({
        "account": info.account,
        "container": info.container,
        "put_timestamp": info.put_timestamp,
        "delete_timestamp": info.delete_timestamp,
        "object_count": info.object_count,
        "bytes_used": info.bytes_used,
        "sync_point": sync_point,
    }))
}

fn merge_items(broker: &ContainerBroker, args: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let rows: Vec<WireRow> = args
        .get(0)
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ErrorMetadata::bad_request("InvalidRpcArgs", format!("malformed merge_items rows: {e}")))?
        .ok_or_else(|| ErrorMetadata::bad_request("InvalidRpcArgs", "merge_items requires [rows]"))?;
    let merge_rows: Vec<MergeRow> = rows.into_iter().map(MergeRow::from).collect();
    broker.merge_items(&merge_rows)?;
    Ok(serde_json::json!({ "status": "ok", "count": merge_rows.len() }))
}

fn merge_syncpoint(broker: &ContainerBroker, args: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let remote_id = args
        .get(0)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ErrorMetadata::bad_request("InvalidRpcArgs", "merge_syncpoint requires [remote_id, point]"))?;
    let point = args
        .get(1)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| ErrorMetadata::bad_request("InvalidRpcArgs", "merge_syncpoint requires [remote_id, point]"))?;
    broker.merge_syncpoint(remote_id, point)?;
    Ok(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn broker(dir: &TempDir) -> ContainerBroker {
        let b = ContainerBroker::open(dir.path().join("c.db"), "acct", "cont", "hash");
        b.initialize(100.0).unwrap();
        b
    }

    #[test]
    fn unknown_method_is_a_bad_request() {
        let dir = TempDir::new().unwrap();
        let b = broker(&dir);
        let body = serde_json::json!({"method": "frobnicate", "args": []});
        assert!(dispatch(&b, &body).is_err());
    }

    #[test]
    fn merge_items_applies_rows() {
        let dir = TempDir::new().unwrap();
        let b = broker(&dir);
        let body = serde_json::json!({
            "method": "merge_items",
            "args": [[{"name": "obj", "created_at": 150.0, "size": 4, "content_type": "text/plain", "etag": "x", "deleted": false}]],
        });
        let resp = dispatch(&b, &body).unwrap();
        assert_eq!(resp["status"], "ok");
        assert_eq!(b.get_info().unwrap().bytes_used, 4);
    }

    #[test]
    fn sync_reports_info_and_sync_point() {
        let dir = TempDir::new().unwrap();
        let b = broker(&dir);
        b.merge_syncpoint("peer-a", 7).unwrap();
        let body = serde_json::json!({"method": "sync", "args": ["peer-a"]});
        let resp = dispatch(&b, &body).unwrap();
        assert_eq!(resp["sync_point"], 7);
    }

    #[test]
    fn merge_syncpoint_updates_high_water_mark() {
        let dir = TempDir::new().unwrap();
        let b = broker(&dir);
        let body = serde_json::json!({"method": "merge_syncpoint", "args": ["peer-b", 42]});
        dispatch(&b, &body).unwrap();
        assert_eq!(b.get_sync("peer-b").unwrap(), 42);
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let dir = TempDir::new().unwrap();
        let b = broker(&dir);
        let body = serde_json::json!({"not_a_method_field": true});
        assert!(dispatch(&b, &body).is_err());
    }
}
