//! Resharing session orchestration
//!
//! Runs the stages of a resharing ceremony in order: session parsing,
//! recipient resolution, topic provisioning, message composition and
//! delivery. Every stage before delivery is fatal, as is cancellation before
//! delivery starts; delivery failures are collected per operator in the
//! returned report.

use crate::cancel::CancelToken;
use crate::composer::compose_initiation;
use crate::delivery::{DeliveryOrchestrator, DeliveryReport, OperatorTransport};
use crate::directory::{resolve_all, OperatorDirectory};
use crate::messenger::Messenger;
use crate::signer::CryptoSigner;
use crate::topic::provision_topic;
use crate::{Error, ResharingRequest, ResharingSession, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Drives resharing sessions against a messenger and operator nodes
pub struct Orchestrator<M: Messenger, T: OperatorTransport, S: CryptoSigner> {
    messenger: M,
    delivery: DeliveryOrchestrator<T>,
    signer: S,
}

impl<M: Messenger, T: OperatorTransport, S: CryptoSigner> Orchestrator<M, T, S> {
    /// Create an orchestrator
    pub fn new(messenger: M, transport: Arc<T>, signer: S) -> Self {
        Self {
            messenger,
            delivery: DeliveryOrchestrator::new(transport),
            signer,
        }
    }

    /// Bound the number of deliveries in flight
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.delivery = self.delivery.with_max_concurrency(max_concurrency);
        self
    }

    /// Set the per-delivery timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.delivery = self.delivery.with_request_timeout(timeout);
        self
    }

    /// Messenger used for topic provisioning
    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    /// Parse a request and run it, resolving addresses from the request
    pub async fn run(&self, request: &ResharingRequest, cancel: CancelToken) -> Result<DeliveryReport> {
        let session = ResharingSession::from_request(request)?;
        self.run_session(&session, &session, cancel).await
    }

    /// Run an already parsed session
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn run_session<D: OperatorDirectory + ?Sized>(
        &self,
        session: &ResharingSession,
        directory: &D,
        cancel: CancelToken,
    ) -> Result<DeliveryReport> {
        let operator_ids = session.all_operator_ids();
        info!(
            operators = ?session.new_operator_ids(),
            old_operators = ?session.old_operator_ids(),
            threshold = session.threshold,
            "Starting resharing session"
        );

        let recipients = resolve_all(directory, &operator_ids)?;

        let mut aborted = cancel.clone();
        tokio::select! {
            biased;
            _ = aborted.cancelled() => {
                warn!("Session cancelled during topic provisioning");
                return Err(Error::Cancelled);
            }
            provisioned = provision_topic(&self.messenger, &session.session_id, &operator_ids) => {
                provisioned?;
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let message = compose_initiation(session, &self.signer)?;

        let report = self.delivery.deliver(&message, &recipients, cancel).await;
        info!(complete = report.is_complete(), "Resharing init request sent");
        Ok(report)
    }
}
