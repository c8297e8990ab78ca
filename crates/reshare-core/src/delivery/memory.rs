//! In-memory operator transport for testing

use super::{async_trait, DeliveryError, OperatorTransport};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records deliveries instead of sending them
#[derive(Default)]
pub struct MemoryTransport {
    /// Accepted deliveries: (address, payload)
    deliveries: Mutex<Vec<(String, Vec<u8>)>>,
    /// Addresses that reject deliveries
    failures: DashMap<String, DeliveryError>,
    /// Artificial latency per delivery
    delay: Option<Duration>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryTransport {
    /// Create a transport that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every delivery to `address` with `error`
    pub fn fail_address(self, address: &str, error: DeliveryError) -> Self {
        self.failures.insert(address.to_string(), error);
        self
    }

    /// Delay every delivery
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Accepted deliveries
    pub fn deliveries(&self) -> Vec<(String, Vec<u8>)> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Addresses that accepted a delivery, sorted
    pub fn delivered_to(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.deliveries().into_iter().map(|(a, _)| a).collect();
        addresses.sort();
        addresses
    }

    /// Delivery attempts, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent deliveries observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Deliveries currently in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Counts a delivery as in flight until dropped, including when its future is abandoned
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OperatorTransport for MemoryTransport {
    async fn consume(&self, address: &str, payload: &[u8]) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        drop(guard);

        if let Some(error) = self.failures.get(address) {
            return Err(error.value().clone());
        }

        self.deliveries
            .lock()
            .map_err(|_| DeliveryError::Transport("delivery log poisoned".into()))?
            .push((address.to_string(), payload.to_vec()));
        Ok(())
    }
}
