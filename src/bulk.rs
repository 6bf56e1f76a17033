//! Batched request handling: indexed request set, bulk transaction
//! coordinator, and response aggregation.
//!
//! A batch is processed inside one storage transaction. Per-element
//! validation failures stay per-element; store faults poison the shared
//! transaction and abort every index; a final whole-batch output check gates
//! the commit even when every index individually succeeded.

use std::future::Future;

use anyhow::bail;
use serde::Serialize;
use serde_json::Value;

use crate::error::{
    ACCESS_DENIED, ErrorCode, LibError, MAX_REQUESTS_EXCEEDED, OPERATION_ABORTED, Result,
    VALIDATION_FAILED,
};
use crate::models::{Identity, IdentityId};
use crate::propagate::BatchEffects;
use crate::store::{Store, StoreTx, TxKind};

/// Cardinality constraints an operation kind declares for its batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchParams {
    /// Reject batches larger than this before any transaction opens.
    pub max_requests: Option<usize>,
    /// Whether an empty input array means "one empty/default operation"
    /// (e.g. list-all) instead of a client error.
    pub enable_empty: bool,
}

/// Per-element semantic validation, checked before the transaction opens.
/// Failures pre-fail the element's slot without touching its siblings.
pub trait Validate {
    fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Terminal outcome of one batch index.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    ClientError(ErrorCode),
    /// Collaborator fault on this index; no detail leaks to the caller.
    InternalError,
    /// This index was fine but a sibling poisoned the shared transaction.
    Aborted,
}

impl Outcome {
    pub fn ok<T: Serialize>(payload: &T) -> std::result::Result<Self, BatchAbort> {
        let value = serde_json::to_value(payload)
            .map_err(|err| BatchAbort::internal(anyhow::Error::new(err)))?;
        Ok(Self::Ok(value))
    }
}

/// One element of the wire response array.
#[derive(Debug, Clone, Serialize)]
pub struct BulkResponse {
    pub index: usize,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<WireError>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub code: &'static str,
    pub message: &'static str,
}

impl BulkResponse {
    pub fn client_error(index: usize, code: ErrorCode) -> Self {
        Self {
            index,
            status: code.status,
            ok: None,
            errors: Some(vec![WireError {
                code: code.code,
                message: code.message,
            }]),
        }
    }

    fn from_outcome(index: usize, outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(value) => Self {
                index,
                status: 200,
                ok: Some(value),
                errors: None,
            },
            Outcome::ClientError(code) => Self::client_error(index, code),
            Outcome::InternalError => Self {
                index,
                status: 500,
                ok: None,
                errors: None,
            },
            Outcome::Aborted => Self::client_error(index, OPERATION_ABORTED),
        }
    }
}

/// Whole-batch abort raised by per-index work: a store fault (internal) or a
/// condition the original deny-by-default arms treat as batch-fatal.
#[derive(Debug)]
pub struct BatchAbort {
    pub outcome: Outcome,
    pub source: anyhow::Error,
}

impl BatchAbort {
    pub fn internal(source: anyhow::Error) -> Self {
        Self {
            outcome: Outcome::InternalError,
            source,
        }
    }

    pub fn client(code: ErrorCode, source: anyhow::Error) -> Self {
        Self {
            outcome: Outcome::ClientError(code),
            source,
        }
    }
}

impl From<LibError> for BatchAbort {
    fn from(value: LibError) -> Self {
        Self::internal(value.source)
    }
}

#[derive(Debug)]
pub struct Slot<I> {
    pub index: usize,
    /// `None` is the synthesized empty/default operation (list-all).
    pub input: Option<I>,
    pub outcome: Option<Outcome>,
}

/// The indexed request set: one slot per input element, index identity
/// preserved end to end.
#[derive(Debug)]
pub struct Batch<I> {
    slots: Vec<Slot<I>>,
}

impl<I: Validate> Batch<I> {
    /// Build the slot set, applying cardinality constraints and per-element
    /// validation. `Err` carries a complete response array for calls that
    /// must be rejected before any transaction opens.
    pub fn new(
        inputs: Vec<I>,
        params: BatchParams,
    ) -> std::result::Result<Self, Vec<BulkResponse>> {
        if inputs.is_empty() {
            if params.enable_empty {
                return Ok(Self {
                    slots: vec![Slot {
                        index: 0,
                        input: None,
                        outcome: None,
                    }],
                });
            }
            return Err(vec![BulkResponse::client_error(0, VALIDATION_FAILED)]);
        }

        if let Some(max) = params.max_requests {
            if inputs.len() > max {
                return Err((0..inputs.len())
                    .map(|index| BulkResponse::client_error(index, MAX_REQUESTS_EXCEEDED))
                    .collect());
            }
        }

        let slots = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let outcome = match input.validate() {
                    Ok(()) => None,
                    Err(err) => {
                        tracing::debug!(index, error = %err, "batch element failed validation");
                        Some(Outcome::ClientError(VALIDATION_FAILED))
                    }
                };
                Slot {
                    index,
                    input: Some(input),
                    outcome,
                }
            })
            .collect();

        Ok(Self { slots })
    }
}

impl<I> Batch<I> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn fail_all(&mut self, outcome: Outcome) {
        for slot in &mut self.slots {
            slot.outcome = Some(outcome.clone());
        }
    }

    /// Mark the batch aborted after a rollback. Slots that already carry a
    /// per-element client error keep it; tentative oks and unprocessed slots
    /// become `Aborted` since their writes no longer exist.
    fn abort_all(&mut self) {
        for slot in &mut self.slots {
            match slot.outcome {
                Some(Outcome::ClientError(_)) | Some(Outcome::InternalError) => {}
                _ => slot.outcome = Some(Outcome::Aborted),
            }
        }
    }

    /// Structural half of the aggregate output gate: every index must carry
    /// exactly one outcome and ok payloads must be real payloads.
    fn validate_outputs(&self) -> anyhow::Result<()> {
        for slot in &self.slots {
            match &slot.outcome {
                None => bail!("index {} produced no output", slot.index),
                Some(Outcome::Ok(Value::Null)) => {
                    bail!("index {} produced a null payload", slot.index)
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn outcomes(&self) -> Vec<Outcome> {
        self.slots
            .iter()
            .map(|slot| slot.outcome.clone().unwrap_or(Outcome::InternalError))
            .collect()
    }

    pub fn into_responses(self) -> Vec<BulkResponse> {
        self.slots
            .into_iter()
            .map(|slot| {
                BulkResponse::from_outcome(
                    slot.index,
                    slot.outcome.unwrap_or(Outcome::InternalError),
                )
            })
            .collect()
    }
}

/// Per-operation-kind post-condition helper: mutating kinds deny the whole
/// batch when any index failed, so partially-applied writes never commit.
pub fn require_all_ok(outcomes: &[Outcome]) -> anyhow::Result<()> {
    for (index, outcome) in outcomes.iter().enumerate() {
        if !matches!(outcome, Outcome::Ok(_)) {
            bail!("index {index} did not produce an ok output");
        }
    }
    Ok(())
}

/// Business logic for one operation kind, invoked once per live slot inside
/// the shared transaction.
pub trait BatchHandler<Tx: StoreTx>: Send {
    type Input: Validate + Send + Sync;

    const TX_KIND: TxKind;
    const PARAMS: BatchParams;
    const REQUIRES_REQUESTOR: bool = false;

    /// `input == None` is the synthesized empty/default operation.
    /// `Err` aborts the entire batch (see [`BatchAbort`]).
    fn handle(
        &mut self,
        tx: &mut Tx,
        requestor: Option<&Identity>,
        input: Option<&Self::Input>,
    ) -> impl Future<Output = std::result::Result<Outcome, BatchAbort>> + Send;

    /// Pluggable half of the aggregate output gate, checked once per batch
    /// after all indices completed and before commit.
    fn check_outputs(&self, outcomes: &[Outcome]) -> anyhow::Result<()> {
        let _ = outcomes;
        Ok(())
    }

    /// Effects to hand to the post-commit propagator. Only consulted after a
    /// successful commit.
    fn take_effects(&mut self) -> Option<BatchEffects> {
        None
    }
}

#[derive(Debug)]
pub struct BatchResult {
    pub responses: Vec<BulkResponse>,
    /// Present only when the transaction committed and the handler reported
    /// material create/delete effects.
    pub effects: Option<BatchEffects>,
}

/// Drive one storage transaction across all indices of a batch and decide
/// commit vs. rollback for the batch as a whole.
pub async fn execute_batch<St, H>(
    store: &St,
    subject: Option<&str>,
    mut batch: Batch<H::Input>,
    mut handler: H,
) -> BatchResult
where
    St: Store,
    H: BatchHandler<St::Tx>,
{
    let mut tx = match store.begin(H::TX_KIND).await {
        Ok(tx) => tx,
        Err(err) => {
            tracing::debug!(error = %err.source, "failed to open storage transaction");
            batch.fail_all(Outcome::InternalError);
            return aborted(batch);
        }
    };

    // Resolved once, shared read-only across all indices. A store failure
    // here is a collaborator fault and fails the whole batch.
    let requestor = match resolve_requestor(&mut tx, subject).await {
        Ok(requestor) => requestor,
        Err(err) => {
            tracing::debug!(error = %err.source, "failed to resolve requestor identity");
            batch.fail_all(Outcome::InternalError);
            rollback_quiet(tx).await;
            return aborted(batch);
        }
    };

    if H::REQUIRES_REQUESTOR && requestor.is_none() {
        batch.fail_all(Outcome::ClientError(ACCESS_DENIED));
        rollback_quiet(tx).await;
        return aborted(batch);
    }

    let mut fault: Option<(usize, BatchAbort)> = None;
    for i in 0..batch.slots.len() {
        if batch.slots[i].outcome.is_some() {
            continue;
        }
        match handler
            .handle(&mut tx, requestor.as_ref(), batch.slots[i].input.as_ref())
            .await
        {
            Ok(outcome) => batch.slots[i].outcome = Some(outcome),
            Err(abort) => {
                fault = Some((i, abort));
                break;
            }
        }
    }

    if let Some((index, abort)) = fault {
        tracing::debug!(index, error = %abort.source, "batch index failed, aborting whole batch");
        batch.abort_all();
        batch.slots[index].outcome = Some(abort.outcome);
        rollback_quiet(tx).await;
        return aborted(batch);
    }

    let outcomes = batch.outcomes();
    if let Err(err) = batch
        .validate_outputs()
        .and_then(|()| handler.check_outputs(&outcomes))
    {
        tracing::debug!(error = %err, "batch output validation failed, rolling back");
        batch.abort_all();
        rollback_quiet(tx).await;
        return aborted(batch);
    }

    if let Err(err) = tx.commit().await {
        tracing::debug!(error = %err.source, "failed to commit batch transaction");
        batch.fail_all(Outcome::InternalError);
        return aborted(batch);
    }

    BatchResult {
        responses: batch.into_responses(),
        effects: handler.take_effects(),
    }
}

fn aborted<I>(batch: Batch<I>) -> BatchResult {
    BatchResult {
        responses: batch.into_responses(),
        effects: None,
    }
}

async fn resolve_requestor<Tx: StoreTx>(
    tx: &mut Tx,
    subject: Option<&str>,
) -> Result<Option<Identity>> {
    let Some(subject) = subject else {
        return Ok(None);
    };
    let Ok(id) = subject.parse::<IdentityId>() else {
        tracing::debug!(subject, "bearer subject is not an identity id");
        return Ok(None);
    };
    let identities = tx.fetch_identities(&[id]).await?;
    Ok(identities.into_iter().next())
}

async fn rollback_quiet<Tx: StoreTx>(tx: Tx) {
    if let Err(err) = tx.rollback().await {
        tracing::debug!(error = %err.source, "transaction rollback failed");
    }
}
