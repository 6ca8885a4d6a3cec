//! Common test utilities.
//!
//! Requires the `sim` feature.

use std::sync::Arc;

use famcall_engine::common::{ProfileId, Role};
use famcall_engine::engine::CallEngine;
use famcall_engine::sim::row_store::SubscribeBehavior;
use famcall_engine::sim::{SimBackend, SimEnvironment};

pub fn test_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A shared backend standing in for the replicated row store both endpoints
/// of a call see. `behavior` controls whether `subscribe_*` confirms
/// immediately (the common case) or never confirms, so the polling fallback
/// stays live for tests that exercise it directly.
pub fn shared_backend(behavior: SubscribeBehavior) -> Arc<SimBackend> {
    Arc::new(SimBackend::new(behavior))
}

pub struct Endpoint {
    pub engine: CallEngine<SimEnvironment>,
    pub env: SimEnvironment,
}

fn endpoint(backend: Arc<SimBackend>, role: Role, profile: &str) -> Endpoint {
    let env = SimEnvironment::new(backend);
    let engine = CallEngine::new(env.clone(), role, ProfileId::from(profile));
    Endpoint { engine, env }
}

pub fn parent(backend: Arc<SimBackend>, profile: &str) -> Endpoint {
    endpoint(backend, Role::Parent, profile)
}

pub fn child(backend: Arc<SimBackend>, profile: &str) -> Endpoint {
    endpoint(backend, Role::Child, profile)
}

pub fn family_member(backend: Arc<SimBackend>, profile: &str) -> Endpoint {
    endpoint(backend, Role::FamilyMember, profile)
}
