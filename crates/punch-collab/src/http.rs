//! Approval workflow over HTTP

use async_trait::async_trait;
use punch_util::TicketRef;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ApprovalRequest, ApprovalWorkflow, CollabError, CollabResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    ticket_ref: String,
}

/// Posts approval requests as JSON to a configured endpoint
pub struct HttpApprovalWorkflow {
    url: String,
    client: reqwest::Client,
}

impl HttpApprovalWorkflow {
    pub fn new(url: impl Into<String>, timeout: Duration) -> CollabResult<Self> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ApprovalWorkflow for HttpApprovalWorkflow {
    async fn create_request(&self, request: &ApprovalRequest) -> CollabResult<TicketRef> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %self.url, error = %e, "Approval workflow unreachable");
                CollabError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CollabError::Unavailable(format!("status {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollabError::Rejected(format!("status {}: {}", status.as_u16(), body)));
        }

        let created: CreatedResponse = response
            .json()
            .await
            .map_err(|e| CollabError::InvalidResponse(e.to_string()))?;

        if created.ticket_ref.trim().is_empty() {
            return Err(CollabError::InvalidResponse("empty ticketRef".into()));
        }

        debug!(kind = %request.kind, ticket_ref = %created.ticket_ref, "Approval request created");
        Ok(TicketRef::new(created.ticket_ref))
    }
}

/// Used when no approval endpoint is configured; every call reports unavailable
#[derive(Debug, Default)]
pub struct DisabledApprovalWorkflow;

#[async_trait]
impl ApprovalWorkflow for DisabledApprovalWorkflow {
    async fn create_request(&self, request: &ApprovalRequest) -> CollabResult<TicketRef> {
        debug!(kind = %request.kind, "Approval workflow disabled, dropping request");
        Err(CollabError::Unavailable("approval workflow not configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceRef;
    use punch_api::ExceptionKind;
    use punch_util::UserId;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            kind: ExceptionKind::MissedPunchOut,
            source_ref: SourceRef::User {
                user_id: UserId::new("emp-1"),
            },
            requested_by: UserId::new("emp-1"),
            reason: "Forgot to clock out".into(),
        }
    }

    #[tokio::test]
    async fn disabled_workflow_is_unavailable() {
        let result = DisabledApprovalWorkflow.create_request(&request()).await;
        assert!(matches!(result, Err(CollabError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        // Port 9 (discard) on localhost is not expected to accept HTTP
        let workflow =
            HttpApprovalWorkflow::new("http://127.0.0.1:9/requests", Duration::from_millis(200))
                .unwrap();
        let result = workflow.create_request(&request()).await;
        assert!(matches!(result, Err(CollabError::Unavailable(_))));
    }
}
