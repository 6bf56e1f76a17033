//! In-memory store and recording collaborator doubles for exercising batch
//! semantics without Postgres or live mirror services.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    Client, ClientId, Follow, Identity, IdentityId, Invite, InviteFilter, NewClient,
};
use crate::propagate::{AuthzMirror, DomainEvent, EventPublisher, MirrorClient, PolicyMirror};
use crate::store::{Store, StoreTx, TxKind};

#[derive(Debug, Clone, Default)]
struct MemState {
    identities: Vec<Identity>,
    clients: Vec<Client>,
    follows: Vec<Follow>,
    invites: Vec<Invite>,
}

/// Transactional in-memory store. Each transaction stages a snapshot; only
/// `commit` publishes it, so rollbacks (explicit or by drop) discard staged
/// writes exactly like the real store.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
    fail_ops: Arc<Mutex<HashSet<&'static str>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to the named operation fail.
    pub fn fail_on(&self, op: &'static str) {
        self.fail_ops.lock().unwrap().insert(op);
    }

    pub fn seed_identity(&self, identity: Identity) {
        self.state.lock().unwrap().identities.push(identity);
    }

    pub fn seed_client(&self, client: Client) {
        self.state.lock().unwrap().clients.push(client);
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().unwrap().clients.len()
    }

    pub fn clients(&self) -> Vec<Client> {
        self.state.lock().unwrap().clients.clone()
    }

    pub fn follows(&self) -> Vec<Follow> {
        self.state.lock().unwrap().follows.clone()
    }

    pub fn invites(&self) -> Vec<Invite> {
        self.state.lock().unwrap().invites.clone()
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.fail_ops.lock().unwrap().contains(op) {
            return Err(LibError::database(
                "Database request failed",
                anyhow!("injected fault in {op}"),
            ));
        }
        Ok(())
    }
}

impl Store for MemStore {
    type Tx = MemTx;

    async fn begin(&self, kind: TxKind) -> Result<MemTx> {
        self.check("begin")?;
        let staged = self.state.lock().unwrap().clone();
        Ok(MemTx {
            store: self.clone(),
            staged,
            kind,
        })
    }
}

pub struct MemTx {
    store: MemStore,
    staged: MemState,
    kind: TxKind,
}

impl StoreTx for MemTx {
    async fn commit(self) -> Result<()> {
        self.store.check("commit")?;
        if self.kind == TxKind::Write {
            *self.store.state.lock().unwrap() = self.staged;
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }

    async fn fetch_identities(&mut self, ids: &[IdentityId]) -> Result<Vec<Identity>> {
        self.store.check("fetch_identities")?;
        Ok(self
            .staged
            .identities
            .iter()
            .filter(|identity| ids.contains(&identity.id))
            .cloned()
            .collect())
    }

    async fn fetch_clients(
        &mut self,
        owner: IdentityId,
        ids: Option<&[ClientId]>,
    ) -> Result<Vec<Client>> {
        self.store.check("fetch_clients")?;
        Ok(self
            .staged
            .clients
            .iter()
            .filter(|client| client.owner == owner)
            .filter(|client| ids.is_none_or(|ids| ids.contains(&client.id)))
            .cloned()
            .collect())
    }

    async fn create_client(&mut self, client: NewClient) -> Result<Client> {
        self.store.check("create_client")?;
        let client = Client {
            id: ClientId(Uuid::new_v4()),
            issuer: client.issuer,
            name: client.name,
            description: client.description,
            secret: client.secret,
            grant_types: client.grant_types,
            response_types: client.response_types,
            redirect_uris: client.redirect_uris,
            post_logout_redirect_uris: client.post_logout_redirect_uris,
            audiences: client.audiences,
            token_endpoint_auth_method: client.token_endpoint_auth_method,
            owner: client.owner,
            created_at: Utc::now(),
        };
        self.staged.clients.push(client.clone());
        Ok(client)
    }

    async fn delete_client(&mut self, id: ClientId) -> Result<Option<Client>> {
        self.store.check("delete_client")?;
        let position = self.staged.clients.iter().position(|client| client.id == id);
        Ok(position.map(|i| self.staged.clients.remove(i)))
    }

    async fn create_follow(
        &mut self,
        from: IdentityId,
        to: IdentityId,
    ) -> Result<Option<Follow>> {
        self.store.check("create_follow")?;
        let edge = Follow { from, to };
        if self.staged.follows.contains(&edge) {
            return Ok(None);
        }
        self.staged.follows.push(edge);
        Ok(Some(edge))
    }

    async fn fetch_follows(&mut self, from: Option<IdentityId>) -> Result<Vec<Follow>> {
        self.store.check("fetch_follows")?;
        Ok(self
            .staged
            .follows
            .iter()
            .filter(|edge| from.is_none_or(|from| edge.from == from))
            .copied()
            .collect())
    }

    async fn create_invite(&mut self, invite: Invite) -> Result<Invite> {
        self.store.check("create_invite")?;
        self.staged.invites.push(invite.clone());
        Ok(invite)
    }

    async fn fetch_invites(&mut self, filter: InviteFilter) -> Result<Vec<Invite>> {
        self.store.check("fetch_invites")?;
        Ok(self
            .staged
            .invites
            .iter()
            .filter(|invite| {
                filter.id.is_none_or(|id| invite.id == id)
                    && filter
                        .email
                        .as_deref()
                        .is_none_or(|email| invite.email.as_deref() == Some(email))
            })
            .cloned()
            .collect())
    }
}

pub fn identity_fixture(username: &str) -> Identity {
    Identity {
        id: IdentityId(Uuid::new_v4()),
        issuer: "https://idp.test".into(),
        username: username.into(),
        created_at: Utc::now(),
    }
}

pub fn mirror_fixture(name: &str) -> MirrorClient {
    MirrorClient {
        id: ClientId(Uuid::new_v4()),
        name: name.into(),
        secret: Some("plaintext-secret".into()),
        grant_types: vec!["client_credentials".into()],
        response_types: vec![],
        redirect_uris: vec![],
        post_logout_redirect_uris: vec![],
        audiences: vec![],
        token_endpoint_auth_method: "client_secret_basic".into(),
    }
}

#[derive(Default)]
pub struct RecordingMirror {
    created: Mutex<Vec<ClientId>>,
    deleted: Mutex<Vec<ClientId>>,
    fail_next: AtomicBool,
}

impl RecordingMirror {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<ClientId> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<ClientId> {
        self.deleted.lock().unwrap().clone()
    }

    fn trip(&self) -> anyhow::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("injected mirror fault");
        }
        Ok(())
    }
}

impl AuthzMirror for RecordingMirror {
    async fn create_client(&self, client: &MirrorClient) -> anyhow::Result<()> {
        self.trip()?;
        self.created.lock().unwrap().push(client.id);
        Ok(())
    }

    async fn delete_client(&self, id: ClientId) -> anyhow::Result<()> {
        self.trip()?;
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPolicy {
    grants: Mutex<Vec<(IdentityId, ClientId)>>,
    dropped: Mutex<Vec<ClientId>>,
    fail_next: AtomicBool,
}

impl RecordingPolicy {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn grants(&self) -> Vec<(IdentityId, ClientId)> {
        self.grants.lock().unwrap().clone()
    }

    pub fn dropped(&self) -> Vec<ClientId> {
        self.dropped.lock().unwrap().clone()
    }

    fn trip(&self) -> anyhow::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("injected policy fault");
        }
        Ok(())
    }
}

impl PolicyMirror for RecordingPolicy {
    async fn grant_ownership(&self, owner: IdentityId, client: ClientId) -> anyhow::Result<()> {
        self.trip()?;
        self.grants.lock().unwrap().push((owner, client));
        Ok(())
    }

    async fn drop_client(&self, client: ClientId) -> anyhow::Result<()> {
        self.trip()?;
        self.dropped.lock().unwrap().push(client);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    published: Mutex<Vec<DomainEvent>>,
}

impl RecordingEvents {
    pub fn published(&self) -> Vec<DomainEvent> {
        self.published.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingEvents {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}
