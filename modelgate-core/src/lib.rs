//! Per-request access decisions and quota enforcement for an LLM routing
//! layer.
//!
//! The embedding gateway hands the engine a configuration snapshot, an
//! already-resolved identity, and the request body; the engine answers with
//! a single [`Outcome`]: allow, allow against a substitute model, or deny
//! with a caller-visible reason, plus optional context-clip and notice
//! annotations. All evaluation is synchronous and in-memory; the only shared
//! mutable state is the per-identity usage-history table owned by the
//! engine.
//!
//! ```
//! use modelgate_core::{DecisionEngine, GuardConfig, Identity};
//!
//! let config = GuardConfig::parse(r#"{
//!     // gate everything through the default catch-all cohort
//!     "user_groups": [{"id": "everyone", "permissions": {"rpm": 60}}]
//! }"#)?;
//!
//! let engine = DecisionEngine::new();
//! let identity = Identity {
//!     id: "u-123".to_string(),
//!     email: "user@example.com".to_string(),
//!     role: "user".to_string(),
//! };
//! let mut body = serde_json::json!({"model": "gpt-4o", "messages": []});
//!
//! let outcome = engine.decide(&config, &identity, &mut body)?;
//! assert!(outcome.decision.is_allowed());
//! # Ok::<(), modelgate_core::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod groups;
pub mod identity;
mod messages;
pub mod permission;
pub mod pipeline;
pub mod rate_limiting;
mod templates;

pub use config::GuardConfig;
pub use error::{Error, ErrorDetails};
pub use identity::Identity;
pub use pipeline::{Decision, DecisionEngine, Outcome};
