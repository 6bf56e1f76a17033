//! Follow-edge endpoints: batched create and read over directed edges
//! between identities. Both edge endpoints must exist before the edge does.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::bulk::{BatchAbort, BatchHandler, BatchParams, Outcome, Validate, require_all_ok};
use crate::error::{ENTITY_NOT_CREATED, ENTITY_NOT_FOUND};
use crate::models::{Follow, Identity, IdentityId};
use crate::store::{StoreTx, TxKind};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFollowRequest {
    pub from: IdentityId,
    pub to: IdentityId,
}

impl Validate for CreateFollowRequest {
    fn validate(&self) -> anyhow::Result<()> {
        if self.from == self.to {
            anyhow::bail!("an identity cannot follow itself");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFollowResponse {
    pub follow: Follow,
}

/// Batched edge creation, capped at one element per call.
pub struct CreateFollows;

impl<Tx: StoreTx> BatchHandler<Tx> for CreateFollows {
    type Input = CreateFollowRequest;

    const TX_KIND: TxKind = TxKind::Write;
    const PARAMS: BatchParams = BatchParams {
        max_requests: Some(1),
        enable_empty: false,
    };
    const REQUIRES_REQUESTOR: bool = true;

    async fn handle(
        &mut self,
        tx: &mut Tx,
        _requestor: Option<&Identity>,
        input: Option<&CreateFollowRequest>,
    ) -> Result<Outcome, BatchAbort> {
        let request = input
            .ok_or_else(|| BatchAbort::internal(anyhow!("empty slot on a non-empty kind")))?;

        // Both endpoints must resolve before an edge may reference them.
        let endpoints = tx.fetch_identities(&[request.from, request.to]).await?;
        if endpoints.len() != 2 {
            return Ok(Outcome::ClientError(ENTITY_NOT_FOUND));
        }

        match tx.create_follow(request.from, request.to).await? {
            Some(follow) => Outcome::ok(&CreateFollowResponse { follow }),
            // Edge identity is the ordered pair; recreating it is a client
            // error, not an idempotent success.
            None => Ok(Outcome::ClientError(ENTITY_NOT_CREATED)),
        }
    }

    fn check_outputs(&self, outcomes: &[Outcome]) -> anyhow::Result<()> {
        require_all_ok(outcomes)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFollowRequest {
    pub from: IdentityId,
}

impl Validate for ReadFollowRequest {}

/// Batched edge lookup. An empty request array lists every edge.
pub struct ReadFollows;

impl<Tx: StoreTx> BatchHandler<Tx> for ReadFollows {
    type Input = ReadFollowRequest;

    const TX_KIND: TxKind = TxKind::Read;
    const PARAMS: BatchParams = BatchParams {
        max_requests: None,
        enable_empty: true,
    };

    async fn handle(
        &mut self,
        tx: &mut Tx,
        _requestor: Option<&Identity>,
        input: Option<&ReadFollowRequest>,
    ) -> Result<Outcome, BatchAbort> {
        let follows = tx.fetch_follows(input.map(|request| request.from)).await?;
        Outcome::ok(&follows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{Batch, execute_batch};
    use crate::error::VALIDATION_FAILED;
    use crate::testutil::{MemStore, MemTx, identity_fixture};
    use uuid::Uuid;

    fn seeded_pair() -> (MemStore, crate::models::Identity, crate::models::Identity) {
        let store = MemStore::new();
        let alice = identity_fixture("alice");
        let bob = identity_fixture("bob");
        store.seed_identity(alice.clone());
        store.seed_identity(bob.clone());
        (store, alice, bob)
    }

    async fn create_edge(
        store: &MemStore,
        subject: &str,
        from: IdentityId,
        to: IdentityId,
    ) -> crate::bulk::BatchResult {
        let batch = Batch::new(
            vec![CreateFollowRequest { from, to }],
            <CreateFollows as BatchHandler<MemTx>>::PARAMS,
        )
        .expect("batch builds");
        execute_batch(store, Some(subject), batch, CreateFollows).await
    }

    #[tokio::test]
    async fn edge_between_existing_identities_is_created() {
        let (store, alice, bob) = seeded_pair();

        let result = create_edge(&store, &alice.id.to_string(), alice.id, bob.id).await;

        assert_eq!(result.responses[0].status, 200);
        assert_eq!(
            store.follows(),
            vec![Follow {
                from: alice.id,
                to: bob.id
            }]
        );
    }

    #[tokio::test]
    async fn edge_to_a_missing_identity_is_not_found() {
        let (store, alice, _) = seeded_pair();
        let ghost = IdentityId(Uuid::new_v4());

        let result = create_edge(&store, &alice.id.to_string(), alice.id, ghost).await;

        let errors = result.responses[0].errors.as_ref().expect("not found");
        assert_eq!(errors[0].code, ENTITY_NOT_FOUND.code);
        assert!(store.follows().is_empty());
    }

    #[tokio::test]
    async fn duplicate_edge_is_rejected() {
        let (store, alice, bob) = seeded_pair();
        create_edge(&store, &alice.id.to_string(), alice.id, bob.id).await;

        let result = create_edge(&store, &alice.id.to_string(), alice.id, bob.id).await;

        let errors = result.responses[0].errors.as_ref().expect("duplicate");
        assert_eq!(errors[0].code, ENTITY_NOT_CREATED.code);
        assert_eq!(store.follows().len(), 1);
    }

    #[tokio::test]
    async fn self_follow_fails_validation() {
        let (store, alice, _) = seeded_pair();

        let result = create_edge(&store, &alice.id.to_string(), alice.id, alice.id).await;

        let errors = result.responses[0].errors.as_ref().expect("validation");
        assert_eq!(errors[0].code, VALIDATION_FAILED.code);
        assert!(store.follows().is_empty());
    }

    #[tokio::test]
    async fn reads_filter_by_origin_or_list_all() {
        let (store, alice, bob) = seeded_pair();
        let carol = identity_fixture("carol");
        store.seed_identity(carol.clone());
        create_edge(&store, &alice.id.to_string(), alice.id, bob.id).await;
        create_edge(&store, &carol.id.to_string(), carol.id, bob.id).await;

        let batch = Batch::new(
            vec![ReadFollowRequest { from: alice.id }],
            <ReadFollows as BatchHandler<MemTx>>::PARAMS,
        )
        .expect("batch builds");
        let result = execute_batch(&store, None, batch, ReadFollows).await;
        let body = result.responses[0].ok.as_ref().expect("payload");
        assert_eq!(body.as_array().expect("array").len(), 1);

        let batch = Batch::<ReadFollowRequest>::new(
            vec![],
            <ReadFollows as BatchHandler<MemTx>>::PARAMS,
        )
        .expect("batch builds");
        let result = execute_batch(&store, None, batch, ReadFollows).await;
        let body = result.responses[0].ok.as_ref().expect("payload");
        assert_eq!(body.as_array().expect("array").len(), 2);
    }
}
