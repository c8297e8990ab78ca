//! Initiation message delivery to operator nodes
//!
//! Delivery fans out one task per recipient, bounded by a semaphore, and
//! funnels every outcome back to a single collector. A failed recipient
//! never stops delivery to the others.

use crate::cancel::CancelToken;
use crate::composer::InitiationMessage;
use crate::{OperatorId, OperatorRecord, SessionId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

pub use crate::messenger::async_trait;

/// Default number of deliveries in flight
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a single delivery failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Operator answered with a non-200 status
    #[error("unexpected status {0}")]
    Status(u16),
    /// No answer within the request timeout
    #[error("request timed out")]
    Timeout,
}

/// Sends payloads to an operator's `/consume` endpoint
#[async_trait]
pub trait OperatorTransport: Send + Sync + 'static {
    /// Deliver a payload to the operator at `address`
    async fn consume(&self, address: &str, payload: &[u8]) -> Result<(), DeliveryError>;
}

/// Final state of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Operator accepted the message
    Delivered,
    /// Delivery failed
    Failed(DeliveryError),
    /// Session was aborted before the delivery finished
    Cancelled,
}

/// Per-operator delivery record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Recipient
    pub operator_id: OperatorId,
    /// Recipient address
    pub address: String,
    /// What happened
    pub status: DeliveryStatus,
}

impl DeliveryOutcome {
    /// Whether the operator accepted the message
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }
}

/// Outcomes of every delivery in a session, ordered by operator ID
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Session the report belongs to
    pub session_id: SessionId,
    /// One outcome per recipient
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    /// Successful deliveries
    pub fn delivered(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| o.is_delivered())
    }

    /// Failed deliveries
    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DeliveryStatus::Failed(_)))
    }

    /// Deliveries cut short by cancellation
    pub fn cancelled(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == DeliveryStatus::Cancelled)
    }

    /// Every recipient accepted the message
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(DeliveryOutcome::is_delivered)
    }
}

/// Fans the initiation message out to operators
pub struct DeliveryOrchestrator<T: OperatorTransport> {
    transport: Arc<T>,
    max_concurrency: usize,
    request_timeout: Duration,
}

impl<T: OperatorTransport> DeliveryOrchestrator<T> {
    /// Create an orchestrator over a shared transport
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the number of deliveries in flight (at least one)
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Deliver to every recipient and collect all outcomes
    ///
    /// Returns once each recipient has an outcome. Recipients sharing an
    /// operator ID are collapsed, the last one wins.
    #[instrument(skip_all, fields(session_id = %message.session_id(), recipients = recipients.len()))]
    pub async fn deliver(
        &self,
        message: &InitiationMessage,
        recipients: &[OperatorRecord],
        cancel: CancelToken,
    ) -> DeliveryReport {
        let targets: BTreeMap<OperatorId, String> = recipients
            .iter()
            .map(|r| (r.id, r.address.clone()))
            .collect();

        // Every recipient gets an outcome even if its task dies
        let mut outcomes: BTreeMap<OperatorId, DeliveryOutcome> = targets
            .iter()
            .map(|(id, address)| {
                let outcome = DeliveryOutcome {
                    operator_id: *id,
                    address: address.clone(),
                    status: DeliveryStatus::Failed(DeliveryError::Transport(
                        "delivery task aborted".into(),
                    )),
                };
                (*id, outcome)
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for (operator_id, address) in targets {
            let transport = Arc::clone(&self.transport);
            let payload = message.shared_payload();
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.request_timeout;
            let mut cancel = cancel.clone();

            tasks.spawn(async move {
                let status = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => DeliveryStatus::Cancelled,
                    status = send_one(transport.as_ref(), &semaphore, &address, &payload, timeout) => status,
                };
                DeliveryOutcome {
                    operator_id,
                    address,
                    status,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.status {
                        DeliveryStatus::Delivered => {
                            debug!(operator_id = outcome.operator_id, "Delivered")
                        }
                        DeliveryStatus::Failed(cause) => warn!(
                            operator_id = outcome.operator_id,
                            address = %outcome.address,
                            %cause,
                            "Delivery failed"
                        ),
                        DeliveryStatus::Cancelled => {
                            debug!(operator_id = outcome.operator_id, "Delivery cancelled")
                        }
                    }
                    outcomes.insert(outcome.operator_id, outcome);
                }
                Err(e) => error!(error = %e, "Delivery task failed"),
            }
        }

        let report = DeliveryReport {
            session_id: message.session_id(),
            outcomes: outcomes.into_values().collect(),
        };

        info!(
            delivered = report.delivered().count(),
            failed = report.failures().count(),
            cancelled = report.cancelled().count(),
            "Delivery finished"
        );

        report
    }
}

async fn send_one<T: OperatorTransport + ?Sized>(
    transport: &T,
    semaphore: &Semaphore,
    address: &str,
    payload: &[u8],
    timeout: Duration,
) -> DeliveryStatus {
    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => return DeliveryStatus::Cancelled,
    };

    match tokio::time::timeout(timeout, transport.consume(address, payload)).await {
        Ok(Ok(())) => DeliveryStatus::Delivered,
        Ok(Err(e)) => DeliveryStatus::Failed(e),
        Err(_) => DeliveryStatus::Failed(DeliveryError::Timeout),
    }
}

/// In-memory transport for testing
pub mod memory;

pub use memory::MemoryTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::composer::compose_initiation;
    use crate::signer::Ed25519Signer;
    use crate::{ResharingRequest, ResharingSession};

    fn initiation() -> InitiationMessage {
        let session = ResharingSession::from_request(&ResharingRequest {
            operators: vec!["1=http://a".into()],
            old_operators: vec![],
            threshold: 1,
            validator_pk: "ab12".into(),
        })
        .unwrap();
        compose_initiation(&session, &Ed25519Signer::generate(1)).unwrap()
    }

    fn recipients(n: u64) -> Vec<OperatorRecord> {
        (1..=n)
            .map(|id| OperatorRecord::new(id, format!("http://op{}", id)))
            .collect()
    }

    #[tokio::test]
    async fn test_all_delivered() {
        let transport = Arc::new(MemoryTransport::new());
        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&transport));
        let message = initiation();

        let report = orchestrator
            .deliver(&message, &recipients(4), CancelToken::never())
            .await;

        assert!(report.is_complete());
        assert_eq!(report.delivered().count(), 4);
        assert_eq!(transport.delivered_to().len(), 4);
        for (_, payload) in transport.deliveries() {
            assert_eq!(payload, message.payload());
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let transport = Arc::new(
            MemoryTransport::new()
                .fail_address("http://op2", DeliveryError::Status(500))
                .fail_address("http://op4", DeliveryError::Transport("connection refused".into())),
        );
        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&transport));

        let report = orchestrator
            .deliver(&initiation(), &recipients(5), CancelToken::never())
            .await;

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.delivered().count(), 3);
        let failed: Vec<_> = report.failures().map(|o| o.operator_id).collect();
        assert_eq!(failed, vec![2, 4]);
        assert_eq!(
            report.outcomes[1].status,
            DeliveryStatus::Failed(DeliveryError::Status(500))
        );
        assert_eq!(report.outcomes[1].address, "http://op2");
        // Every recipient was attempted
        assert_eq!(transport.attempts(), 5);
    }

    #[tokio::test]
    async fn test_concurrency_bounded() {
        let transport = Arc::new(MemoryTransport::new().with_delay(Duration::from_millis(20)));
        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&transport)).with_max_concurrency(3);

        let report = orchestrator
            .deliver(&initiation(), &recipients(10), CancelToken::never())
            .await;

        assert!(report.is_complete());
        assert!(transport.max_in_flight() <= 3);
        assert!(transport.max_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_timeout_recorded() {
        let transport = Arc::new(MemoryTransport::new().with_delay(Duration::from_secs(5)));
        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&transport))
            .with_request_timeout(Duration::from_millis(20));

        let report = orchestrator
            .deliver(&initiation(), &recipients(2), CancelToken::never())
            .await;

        assert_eq!(report.failures().count(), 2);
        assert!(report
            .failures()
            .all(|o| o.status == DeliveryStatus::Failed(DeliveryError::Timeout)));
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_marks_outstanding() {
        let transport = Arc::new(MemoryTransport::new().with_delay(Duration::from_secs(5)));
        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&transport));
        let (handle, token) = CancelHandle::new();

        let message = initiation();
        let recipients = recipients(3);
        let delivery = orchestrator.deliver(&message, &recipients, token);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        };
        let (report, _) = tokio::join!(delivery, cancel);

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.cancelled().count(), 3);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_deliveries_release_in_flight() {
        let transport = Arc::new(MemoryTransport::new().with_delay(Duration::from_secs(5)));
        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&transport))
            .with_request_timeout(Duration::from_millis(10));

        orchestrator
            .deliver(&initiation(), &recipients(4), CancelToken::never())
            .await;
        assert_eq!(transport.in_flight(), 0);
        assert_eq!(transport.max_in_flight(), 4);

        orchestrator
            .deliver(&initiation(), &recipients(2), CancelToken::never())
            .await;
        assert_eq!(transport.max_in_flight(), 4);
        assert_eq!(transport.attempts(), 6);
    }

    #[tokio::test]
    async fn test_duplicate_recipients_collapsed() {
        let transport = Arc::new(MemoryTransport::new());
        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&transport));
        let recipients = vec![
            OperatorRecord::new(1, "http://old"),
            OperatorRecord::new(1, "http://new"),
        ];

        let report = orchestrator
            .deliver(&initiation(), &recipients, CancelToken::never())
            .await;

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(transport.delivered_to(), vec!["http://new".to_string()]);
    }
}
