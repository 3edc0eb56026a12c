//! papl - embeddable policy decision engine
//!
//! Cedar-style authorization ([`authz`]), Rego-style rules ([`rules`]) and a
//! versioned key-value store for policy documents ([`store`]).

pub mod authz;
pub mod engine;
pub mod errors;
pub mod folder;
pub mod rules;
pub mod settings;
pub mod store;

pub use engine::{EngineKind, PolicyEngine};
pub use errors::PaplError;
pub use folder::FolderPolicy;
