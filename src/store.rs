//! The opaque store boundary: read/write transactions over typed entities.
//!
//! The coordinator in `bulk.rs` is written against these traits so batch
//! semantics can be exercised without a running database; `pg.rs` provides
//! the Postgres implementation.

use std::future::Future;

use crate::error::Result;
use crate::models::{
    Client, ClientId, Follow, Identity, IdentityId, Invite, InviteFilter, NewClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Read,
    Write,
}

pub trait Store: Send + Sync {
    type Tx: StoreTx;

    fn begin(&self, kind: TxKind) -> impl Future<Output = Result<Self::Tx>> + Send;
}

/// One storage transaction. Terminal action is exactly one of `commit` or
/// `rollback`; dropping an unterminated transaction must roll back, so the
/// scope releases on every exit path including panics.
pub trait StoreTx: Send {
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(self) -> impl Future<Output = Result<()>> + Send;

    fn fetch_identities(
        &mut self,
        ids: &[IdentityId],
    ) -> impl Future<Output = Result<Vec<Identity>>> + Send;

    /// `ids == None` lists all of the owner's clients. Results never cross
    /// owners; a client owned by someone else is indistinguishable from a
    /// missing one.
    fn fetch_clients(
        &mut self,
        owner: IdentityId,
        ids: Option<&[ClientId]>,
    ) -> impl Future<Output = Result<Vec<Client>>> + Send;

    fn create_client(&mut self, client: NewClient) -> impl Future<Output = Result<Client>> + Send;

    /// Returns the deleted client, or `None` when no row matched.
    fn delete_client(
        &mut self,
        id: ClientId,
    ) -> impl Future<Output = Result<Option<Client>>> + Send;

    /// Returns `None` when the edge already existed.
    fn create_follow(
        &mut self,
        from: IdentityId,
        to: IdentityId,
    ) -> impl Future<Output = Result<Option<Follow>>> + Send;

    /// `from == None` lists all follow edges.
    fn fetch_follows(
        &mut self,
        from: Option<IdentityId>,
    ) -> impl Future<Output = Result<Vec<Follow>>> + Send;

    fn create_invite(&mut self, invite: Invite) -> impl Future<Output = Result<Invite>> + Send;

    fn fetch_invites(
        &mut self,
        filter: InviteFilter,
    ) -> impl Future<Output = Result<Vec<Invite>>> + Send;
}
