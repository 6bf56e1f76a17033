//! Shared service state wiring the store, cipher keyring, and post-commit
//! propagation together for the endpoint layer.

use std::sync::Arc;
use std::time::Duration;

use crate::cipher::Keyring;
use crate::propagate::{
    AuthzMirror, BatchEffects, EventPublisher, PolicyMirror, PropagationStatus, Propagator,
};
use crate::store::Store;

pub struct ServiceContext<St, A, P, E> {
    pub store: St,
    pub keyring: Keyring,
    /// Issuer URI stamped onto every entity this deployment creates.
    pub issuer: String,
    pub propagator: Propagator<A, P, E>,
    pub propagation_timeout: Duration,
}

/// Capabilities the endpoint layer needs from application state. Handlers
/// are generic over this so tests can run against in-memory state.
pub trait IdpApp: Clone + Send + Sync + 'static {
    type Store: Store;

    fn store(&self) -> &Self::Store;

    fn keyring(&self) -> &Keyring;

    fn issuer(&self) -> &str;

    /// Hand committed batch effects to the propagator. Fire-and-forget: the
    /// response does not wait on collaborator round-trips.
    fn propagate(&self, effects: BatchEffects);
}

impl<St, A, P, E> IdpApp for Arc<ServiceContext<St, A, P, E>>
where
    St: Store + 'static,
    A: AuthzMirror + 'static,
    P: PolicyMirror + 'static,
    E: EventPublisher + 'static,
{
    type Store = St;

    fn store(&self) -> &St {
        &self.store
    }

    fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn propagate(&self, effects: BatchEffects) {
        if effects.is_empty() {
            return;
        }
        let context = Arc::clone(self);
        tokio::spawn(async move {
            let run = context.propagator.run(effects);
            match tokio::time::timeout(context.propagation_timeout, run).await {
                Ok(PropagationStatus::Propagated) => {}
                Ok(PropagationStatus::PartiallyPropagated { failed }) => {
                    tracing::warn!(failed, "batch effects only partially propagated");
                }
                Err(_) => {
                    tracing::warn!("propagation timed out, mirrors need reconciliation");
                }
            }
        });
    }
}
