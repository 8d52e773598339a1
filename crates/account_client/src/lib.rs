//! Best-effort notification of container aggregates to the account service.
//!
//! The request's primary mutation has already committed by the time this
//! runs. Nothing here can fail the request back to the client except a
//! `404`, which means the account no longer recognizes this container and
//! the client genuinely needs to know.

use std::time::Duration;

use reqwest::StatusCode;

/// Everything the account service needs to recompute this container's
/// contribution to the account's aggregates.
#[derive(Debug, Clone)]
pub struct AccountUpdateRequest {
    pub host: String,
    pub partition: String,
    pub device: String,
    pub account: String,
    pub container: String,
    pub put_timestamp: f64,
    pub delete_timestamp: f64,
    pub object_count: i64,
    pub bytes_used: i64,
    pub trans_id: Option<String>,
    pub override_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountUpdateOutcome {
    /// 2xx: applied, body (if any) drained and ignored.
    Success,
    /// 404: the account no longer accepts this container.
    NotFound,
    /// Connect/read timeout, non-2xx/404 status, or transport error: logged
    /// and otherwise swallowed, trusting eventual replication to converge.
    Failed,
}

/// Builds a `reqwest::Client` with `conn_timeout` as its connect timeout.
/// Callers build one of these at startup and reuse it across requests.
pub fn build_client(conn_timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().connect_timeout(conn_timeout).build()?)
}

/// Sends the PUT and classifies the outcome. `node_timeout` bounds the
/// entire send-and-read; it does not distinguish connect from read, since
/// `client` already carries its own connect timeout.
pub async fn notify_account(
    client: &reqwest::Client,
    node_timeout: Duration,
    req: AccountUpdateRequest,
) -> AccountUpdateOutcome {
    let url = format!(
        "http://{}/{}/{}/{}/{}",
        req.host, req.device, req.partition, req.account, req.container
    );
    let trans_id = req.trans_id.clone().unwrap_or_else(|| "-".to_string());

    let mut builder = client
        .put(&url)
        .header("x-put-timestamp", container_broker::format_timestamp(req.put_timestamp))
        .header(
            "x-delete-timestamp",
            container_broker::format_timestamp(req.delete_timestamp),
        )
        .header("x-object-count", req.object_count.to_string())
        .header("x-bytes-used", req.bytes_used.to_string())
        .header("x-cf-trans-id", trans_id);
    if req.override_deleted {
        builder = builder.header("x-account-override-deleted", "yes");
    }

    let outcome = match tokio::time::timeout(node_timeout, builder.send()).await {
        Err(_) => {
            tracing::error!(url = %url, "account update timed out");
            AccountUpdateOutcome::Failed
        },
        Ok(Err(err)) => {
            tracing::error!(url = %url, error = %err, "account update request failed");
            AccountUpdateOutcome::Failed
        },
        Ok(Ok(resp)) => match resp.status() {
            StatusCode::NOT_FOUND => AccountUpdateOutcome::NotFound,
            status if status.is_success() => {
                let _ = resp.bytes().await;
                AccountUpdateOutcome::Success
            },
            status => {
                tracing::error!(url = %url, status = %status, "account update rejected");
                AccountUpdateOutcome::Failed
            },
        },
    };

    let label = match outcome {
        AccountUpdateOutcome::Success => "success",
        AccountUpdateOutcome::NotFound => "not_found",
        AccountUpdateOutcome::Failed => "failed",
    };
    metrics::ACCOUNT_UPDATE_OUTCOME_TOTAL.with_label_values(&[label]).inc();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_a_connect_timeout() {
        assert!(build_client(Duration::from_millis(500)).is_ok());
    }
}
