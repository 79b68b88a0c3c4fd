//! qrgate-core - Core library for qrgate
//!
//! Token store, authorization engine, per-token guards, usage recorder and
//! the content-addressed result cache behind the QR-gated generation flow.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod gate;
pub mod guard;
pub mod link;
pub mod models;
pub mod provision;
pub mod recorder;
pub mod store;

pub use auth::{AuthDecision, AuthorizationEngine};
pub use cache::{CacheLookup, CacheNamespace, ResultCache};
pub use config::GateConfig;
pub use error::GateError;
pub use event::{EventBus, GateEvent, TokenEvents};
pub use gate::{Admission, Gate, GenerationBackend, GenerationOutcome, GenerationRequest};
pub use guard::{FingerprintGuard, StyleBudget};
pub use link::extract_token;
pub use provision::ProvisionRequest;
pub use recorder::UsageRecorder;
pub use store::TokenStore;
