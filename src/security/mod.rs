//! Security module
//!
//! Everything that stands between raw call transcripts and a change to the
//! live agent:
//! - Detector tables for manipulation, profanity, and forbidden content
//! - Adversarial transcript filtering and anomaly gating
//! - Proposal safety validation and the core-behavior guard
//! - Approval gate and queue
//! - OS keyring integration

pub mod keyring;
pub mod prompt;
pub mod adversarial;
pub mod anomaly;
pub mod safety;
pub mod guard;
pub mod approval;

pub use adversarial::{AdversarialFilter, DropReason, FilterOutcome};
pub use anomaly::{AnomalyDetector, AnomalyReport};
pub use approval::{ApprovalGate, ApprovalQueue, ApprovalStatus, PendingApproval};
pub use guard::{CoreBehaviorGuard, CoreBehaviorViolation};
pub use keyring::KeyedService;
pub use prompt::{ForbiddenCategory, ManipulationSignature};
pub use safety::{SafetyValidator, SafetyVerdict, Violation};
