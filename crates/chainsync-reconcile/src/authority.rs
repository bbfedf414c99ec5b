//! HTTP client for the ticket authority's internal endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;

use chainsync_core::error::ReconcileError;
use chainsync_core::ports::TicketAuthority;
use chainsync_core::ticket::{ReconcileQuery, RequestContext, SyncPatch, TicketBatch};

const TENANT_HEADER: &str = "x-tenant-id";
const TRACE_HEADER: &str = "x-trace-id";

/// Talks to the ticket service over its service-to-service API.
pub struct HttpTicketAuthority {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpTicketAuthority {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ReconcileError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReconcileError::Authority(format!("client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/internal/tickets/{id}/blockchain-sync`, with `id` encoded as a
    /// single path segment.
    fn blockchain_sync_url(&self, ticket_id: &str) -> Result<reqwest::Url, ReconcileError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ReconcileError::Authority(format!("base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ReconcileError::Authority(format!("base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["internal", "tickets", ticket_id, "blockchain-sync"]);
        Ok(url)
    }

    fn with_context(&self, req: RequestBuilder, ctx: &RequestContext) -> RequestBuilder {
        let req = req
            .header(TENANT_HEADER, &ctx.tenant_id)
            .header(TRACE_HEADER, &ctx.trace_id);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(req: RequestBuilder) -> Result<reqwest::Response, ReconcileError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ReconcileError::Authority(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ReconcileError::Authority(format!("HTTP {status}: {body}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl TicketAuthority for HttpTicketAuthority {
    async fn tickets_for_reconciliation(
        &self,
        ctx: &RequestContext,
        query: ReconcileQuery,
    ) -> Result<TicketBatch, ReconcileError> {
        let req = self
            .http
            .get(self.url("/internal/tickets/reconciliation"))
            .query(&[
                ("limit", query.limit.to_string()),
                ("staleHours", query.stale_hours.to_string()),
            ]);
        let resp = Self::send(self.with_context(req, ctx)).await?;
        resp.json::<TicketBatch>()
            .await
            .map_err(|e| ReconcileError::Authority(format!("decode ticket batch: {e}")))
    }

    async fn update_blockchain_sync(
        &self,
        ticket_id: &str,
        patch: &SyncPatch,
        ctx: &RequestContext,
    ) -> Result<(), ReconcileError> {
        let req = self.http.put(self.blockchain_sync_url(ticket_id)?).json(patch);
        Self::send(self.with_context(req, ctx)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client =
            HttpTicketAuthority::new("http://tickets:3004/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("/internal/tickets/reconciliation"),
            "http://tickets:3004/internal/tickets/reconciliation"
        );
    }

    #[test]
    fn ticket_id_is_a_single_encoded_path_segment() {
        let client =
            HttpTicketAuthority::new("http://tickets:3004/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.blockchain_sync_url("tk-1").unwrap().as_str(),
            "http://tickets:3004/internal/tickets/tk-1/blockchain-sync"
        );
        assert_eq!(
            client.blockchain_sync_url("../a b?x").unwrap().as_str(),
            "http://tickets:3004/internal/tickets/..%2Fa%20b%3Fx/blockchain-sync"
        );

        let prefixed =
            HttpTicketAuthority::new("http://gw/api", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            prefixed.blockchain_sync_url("tk-1").unwrap().as_str(),
            "http://gw/api/internal/tickets/tk-1/blockchain-sync"
        );
    }

    #[test]
    fn context_headers_and_token_are_attached() {
        let client = HttpTicketAuthority::new(
            "http://tickets:3004",
            Some("svc-token".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        let ctx = RequestContext {
            tenant_id: "venue-1".into(),
            trace_id: "trace-1".into(),
        };
        let req = client
            .with_context(client.http.get(client.url("/x")), &ctx)
            .build()
            .unwrap();
        let headers = req.headers();
        assert_eq!(headers[TENANT_HEADER], "venue-1");
        assert_eq!(headers[TRACE_HEADER], "trace-1");
        assert_eq!(headers[reqwest::header::AUTHORIZATION], "Bearer svc-token");
    }
}
