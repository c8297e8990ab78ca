//! # Reshare Core
//!
//! Session orchestration for DKG resharing ceremonies.
//!
//! A resharing ceremony moves an existing distributed key from an old set of
//! operators to a new, possibly overlapping, set. This crate provides:
//! - Request parsing into a [`ResharingSession`]
//! - Topic provisioning on the messenger service
//! - Construction and signing of the initiation message
//! - Concurrent delivery to every operator with per-operator reporting
//! - Operator self-registration with bounded retry
//! - Storage of operator records and key generation outputs
//!
//! ## Example
//!
//! ```rust,ignore
//! use reshare_core::{CancelToken, Orchestrator, ResharingRequest};
//!
//! let orchestrator = Orchestrator::new(messenger, transport, signer);
//! let report = orchestrator.run(&request, CancelToken::never()).await?;
//! println!("session {}", report.session_id);
//! ```

pub mod cancel;
pub mod composer;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod messages;
pub mod messenger;
pub mod orchestrator;
pub mod publish;
pub mod registration;
pub mod session;
pub mod signer;
pub mod storage;
pub mod topic;
pub mod types;

pub use cancel::{CancelHandle, CancelToken};
pub use delivery::{DeliveryError, DeliveryOutcome, DeliveryReport, DeliveryStatus};
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use session::{ResharingRequest, ResharingSession};
pub use types::{KeyGenOutput, OperatorId, OperatorRecord, SessionId};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
