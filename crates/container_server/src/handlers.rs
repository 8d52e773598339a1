use std::sync::Arc;

use account_client::{
    AccountUpdateOutcome,
    AccountUpdateRequest,
};
use axum::{
    body::Bytes,
    extract::{
        Query,
        State,
    },
    http::{
        HeaderMap,
        StatusCode,
        Uri,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use container_broker::{
    ContainerBroker,
    ContainerInfo,
};
use container_listing::{
    negotiate_format,
    Format,
};
use container_path::{
    db_path,
    hash_container,
    parse_container_path,
    parse_replication_path,
};
use errors::{
    ErrorMetadata,
    HttpResponseError,
};
use serde::Deserialize;

use crate::state::AppState;

pub async fn healthcheck() -> &'static str {
    "OK"
}

pub async fn metrics_handler() -> Result<Response, HttpResponseError> {
    let body = metrics::encode_for_scrape()?;
    Ok((StatusCode::OK, body).into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct ListingQuery {
    limit: Option<usize>,
    marker: Option<String>,
    prefix: Option<String>,
    delimiter: Option<String>,
    path: Option<String>,
    format: Option<String>,
}

/// The single entry point for every container/object/replication request.
/// Mirrors the reference server's one-method-per-verb dispatch, except the
/// routing itself (method + path shape) happens here instead of in the
/// framework's router, since replication POSTs and container verbs share no
/// path grammar. Every call into the broker runs on the blocking-thread
/// pool so a slow disk never stalls the async reactor; the account-update
/// side channel, the request's only other suspension point, runs as a
/// plain `await` after the broker work has already committed.
pub async fn dispatch(
    State(state): State<AppState>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<ListingQuery>,
    body: Bytes,
) -> Result<Response, HttpResponseError> {
    if !is_xml_encodable(uri.path()) {
        return Err(ErrorMetadata::precondition_failed("InvalidUtf8", "Invalid UTF8").into());
    }

    if method == axum::http::Method::POST {
        return replication(&state, uri.path(), &body).await.map_err(Into::into);
    }

    let path = parse_container_path(uri.path())?;
    state.mount_guard.check(&path.drive)?;
    let hash = hash_container(&path.account, &path.container);
    let db_path = db_path(&state.config.devices, &path.drive, &path.partition, &hash);
    let broker = state
        .brokers
        .get_or_open(db_path, path.account.clone(), path.container.clone(), hash);

    let response = match method {
        axum::http::Method::PUT => put(&state, &headers, path.object.clone(), broker).await?,
        axum::http::Method::DELETE => delete(&state, &headers, path.object.clone(), broker).await?,
        axum::http::Method::HEAD => blocking(broker, head).await?,
        axum::http::Method::GET => {
            let container = path.container.clone();
            let accept = header_str(&headers, "accept").map(str::to_string);
            let listing_limit = state.config.listing_limit;
            blocking(broker, move |b| get(b, &container, accept.as_deref(), &query, listing_limit)).await?
        },
        _ => anyhow::bail!(ErrorMetadata::method_not_allowed(
            "MethodNotAllowed",
            format!("method {method} is not supported"),
        )),
    };
    Ok(response)
}

/// Runs `f` against `broker` on the blocking-thread pool and flattens the
/// `JoinHandle` error (task panicked) into the same `anyhow::Result`.
async fn blocking<T, F>(broker: Arc<ContainerBroker>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ContainerBroker) -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&broker))
        .await
        .map_err(|e| anyhow::anyhow!("broker task panicked: {e}"))?
}

fn require_timestamp(headers: &HeaderMap) -> anyhow::Result<f64> {
    headers
        .get("x-timestamp")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| ErrorMetadata::bad_request("MissingTimestamp", "Missing timestamp").into())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Every codepoint in an XML 1.0 document must fall in `Char`:
/// `#x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]`.
/// Checked against the percent-decoded path, since that's what ends up
/// quoted into an XML listing body; a raw percent-encoding that doesn't
/// even decode to valid UTF-8 is rejected the same way.
fn is_xml_encodable(raw_path: &str) -> bool {
    let Ok(decoded) = urlencoding::decode(raw_path) else {
        return false;
    };
    decoded.chars().all(|c| {
        let c = c as u32;
        matches!(c, 0x9 | 0xA | 0xD)
            || (0x20..=0xD7FF).contains(&c)
            || (0xE000..=0xFFFD).contains(&c)
            || (0x10000..=0x10FFFF).contains(&c)
    })
}

/// Outcome of the object/container PUT, as decided on the blocking pool;
/// the async caller only needs this to pick a status code and decide
/// whether to fire the account update.
enum PutOutcome {
    ObjectCreated,
    ContainerPut { created: bool },
}

async fn put(
    state: &AppState,
    headers: &HeaderMap,
    object: Option<String>,
    broker: Arc<ContainerBroker>,
) -> anyhow::Result<Response> {
    let ts = require_timestamp(headers)?;

    let outcome = if let Some(object) = object {
        let size = header_str(headers, "x-size")
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| ErrorMetadata::bad_request("MissingSize", "Missing x-size"))?;
        let content_type = header_str(headers, "x-content-type")
            .ok_or_else(|| ErrorMetadata::bad_request("MissingContentType", "Missing x-content-type"))?
            .to_string();
        let etag = header_str(headers, "x-etag")
            .ok_or_else(|| ErrorMetadata::bad_request("MissingEtag", "Missing x-etag"))?
            .to_string();
        blocking(broker.clone(), move |b| {
            if !b.exists() {
                anyhow::bail!(ErrorMetadata::not_found("ContainerNotFound", "no such container"));
            }
            b.put_object(&object, ts, size, &content_type, &etag)?;
            Ok(PutOutcome::ObjectCreated)
        })
        .await?
    } else {
        blocking(broker.clone(), move |b| {
            let created = if !b.exists() {
                b.initialize(ts)?;
                true
            } else {
                let was_deleted = b.is_deleted()?;
                b.update_put_timestamp(ts)?;
                if b.is_deleted()? {
                    anyhow::bail!(ErrorMetadata::conflict(
                        "TombstoneSupersedesPut",
                        "a later delete has already superseded this put",
                    ));
                }
                was_deleted
            };
            Ok(PutOutcome::ContainerPut { created })
        })
        .await?
    };

    let status = match outcome {
        PutOutcome::ObjectCreated => StatusCode::CREATED,
        PutOutcome::ContainerPut { created } => {
            if let Some(err) = maybe_account_update(state, headers, &broker).await? {
                return Err(err.0);
            }
            if created {
                StatusCode::CREATED
            } else {
                StatusCode::ACCEPTED
            }
        },
    };
    Ok(status.into_response())
}

enum DeleteOutcome {
    ObjectDeleted,
    ContainerDeleted { existed: bool },
}

async fn delete(
    state: &AppState,
    headers: &HeaderMap,
    object: Option<String>,
    broker: Arc<ContainerBroker>,
) -> anyhow::Result<Response> {
    let ts = require_timestamp(headers)?;

    let outcome = if let Some(object) = object {
        blocking(broker.clone(), move |b| {
            if !b.exists() {
                anyhow::bail!(ErrorMetadata::not_found("ContainerNotFound", "no such container"));
            }
            b.delete_object(&object, ts)?;
            Ok(DeleteOutcome::ObjectDeleted)
        })
        .await?
    } else {
        blocking(broker.clone(), move |b| {
            if !b.exists() {
                anyhow::bail!(ErrorMetadata::not_found("ContainerNotFound", "no such container"));
            }
            if !b.empty()? {
                anyhow::bail!(ErrorMetadata::conflict("ContainerNotEmpty", "container is not empty"));
            }
            let info_before = b.get_info()?;
            let existed = info_before.put_timestamp != 0.0 && !b.is_deleted()?;
            b.delete_db(ts)?;
            if !b.is_deleted()? {
                anyhow::bail!(ErrorMetadata::conflict(
                    "DeleteSuperseded",
                    "another process superseded this delete",
                ));
            }
            Ok(DeleteOutcome::ContainerDeleted { existed })
        })
        .await?
    };

    let status = match outcome {
        DeleteOutcome::ObjectDeleted => StatusCode::NO_CONTENT,
        DeleteOutcome::ContainerDeleted { existed } => {
            if let Some(err) = maybe_account_update(state, headers, &broker).await? {
                return Err(err.0);
            }
            if existed {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::ACCEPTED
            }
        },
    };
    Ok(status.into_response())
}

fn head(broker: &ContainerBroker) -> anyhow::Result<Response> {
    if broker.is_deleted()? {
        anyhow::bail!(ErrorMetadata::not_found("ContainerDeleted", "container is deleted"));
    }
    let info = broker.get_info()?;
    Ok((StatusCode::NO_CONTENT, info_headers(&info)).into_response())
}

fn get(
    broker: &ContainerBroker,
    container_name: &str,
    accept: Option<&str>,
    query: &ListingQuery,
    listing_limit: usize,
) -> anyhow::Result<Response> {
    if broker.is_deleted()? {
        anyhow::bail!(ErrorMetadata::not_found("ContainerDeleted", "container is deleted"));
    }

    let delimiter = match &query.delimiter {
        None => None,
        Some(d) => {
            let bytes = d.as_bytes();
            if bytes.len() != 1 || bytes[0] > 254 {
                anyhow::bail!(ErrorMetadata::precondition_failed("BadDelimiter", "Bad delimiter"));
            }
            Some(bytes[0])
        },
    };
    let limit = match query.limit {
        Some(v) if v > listing_limit => {
            anyhow::bail!(ErrorMetadata::precondition_failed(
                "MaximumLimit",
                format!("Maximum limit is {listing_limit}"),
            ));
        },
        Some(v) => v,
        None => listing_limit,
    };
    let marker = query.marker.as_deref().unwrap_or("");
    let prefix = query.prefix.as_deref().unwrap_or("");

    let rows = broker.list_objects_iter(limit, marker, prefix, delimiter, query.path.as_deref())?;
    let format = negotiate_format(query.format.as_deref(), accept)?;

    if rows.is_empty() && format == Format::Plain {
        let info = broker.get_info()?;
        return Ok((StatusCode::NO_CONTENT, info_headers(&info)).into_response());
    }

    let body = container_listing::serialize(format, container_name, &rows);
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, format.content_type())],
        body,
    )
        .into_response())
}

fn info_headers(info: &ContainerInfo) -> [(&'static str, String); 4] {
    [
        ("x-container-object-count", info.object_count.to_string()),
        ("x-container-bytes-used", info.bytes_used.to_string()),
        ("x-timestamp", container_broker::format_timestamp(info.created_at)),
        ("x-put-timestamp", container_broker::format_timestamp(info.put_timestamp)),
    ]
}

async fn maybe_account_update(
    state: &AppState,
    headers: &HeaderMap,
    broker: &Arc<ContainerBroker>,
) -> anyhow::Result<Option<HttpResponseError>> {
    let (Some(host), Some(partition), Some(device)) = (
        header_str(headers, "x-account-host"),
        header_str(headers, "x-account-partition"),
        header_str(headers, "x-account-device"),
    ) else {
        return Ok(None);
    };
    let (host, partition, device) = (host.to_string(), partition.to_string(), device.to_string());
    let trans_id = header_str(headers, "x-cf-trans-id").map(str::to_string);
    let override_deleted = header_str(headers, "x-account-override-deleted") == Some("yes");

    let info = blocking(broker.clone(), ContainerBroker::get_info).await?;
    let req = AccountUpdateRequest {
        host,
        partition,
        device,
        account: info.account,
        container: info.container,
        put_timestamp: info.put_timestamp,
        delete_timestamp: info.delete_timestamp,
        object_count: info.object_count,
        bytes_used: info.bytes_used,
        trans_id,
        override_deleted,
    };

    let outcome = account_client::notify_account(&state.account_http, state.config.node_timeout(), req).await;
    match outcome {
        AccountUpdateOutcome::NotFound => Ok(Some(
            anyhow::anyhow!(ErrorMetadata::not_found(
                "AccountNotFound",
                "account service no longer recognizes this container",
            ))
            .into(),
        )),
        AccountUpdateOutcome::Success | AccountUpdateOutcome::Failed => Ok(None),
    }
}

async fn replication(state: &AppState, raw_path: &str, body: &[u8]) -> anyhow::Result<Response> {
    let path = parse_replication_path(raw_path)?;
    state.mount_guard.check(&path.drive)?;
    let db_path = db_path(&state.config.devices, &path.drive, &path.partition, &path.hash);
    let broker = state.brokers.get_or_open(db_path, "", "", path.hash.clone());

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ErrorMetadata::bad_request("InvalidJson", format!("malformed JSON body: {e}")))?;
    let response = blocking(broker, move |b| replication_rpc::dispatch(b, &value)).await?;
    Ok((StatusCode::OK, axum::Json(response)).into_response())
}
