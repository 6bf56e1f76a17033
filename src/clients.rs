//! OAuth2 client endpoints: batched read, create, and delete.
//!
//! Creation is the cipher boundary's main customer: confidential clients get
//! a generated credential when none is supplied, the plaintext goes to the
//! caller exactly once in the response, and only ciphertext reaches the
//! store.

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bulk::{BatchAbort, BatchHandler, BatchParams, Outcome, Validate, require_all_ok};
use crate::cipher::{Keyring, generate_secret};
use crate::error::{ACCESS_DENIED, ENTITY_NOT_FOUND, LibError};
use crate::models::{Client, ClientId, Identity, IdentityId, NewClient};
use crate::propagate::{BatchEffects, MirrorClient};
use crate::store::{StoreTx, TxKind};

/// Generated credential length for confidential clients.
const GENERATED_SECRET_LEN: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct ReadClientRequest {
    pub id: ClientId,
}

impl Validate for ReadClientRequest {}

/// Wire shape of a client. Never carries the secret in any form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub id: ClientId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub audiences: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub owner: IdentityId,
    pub created_at: DateTime<Utc>,
}

impl From<&Client> for ClientSummary {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id,
            name: client.name.clone(),
            description: client.description.clone(),
            grant_types: client.grant_types.clone(),
            response_types: client.response_types.clone(),
            redirect_uris: client.redirect_uris.clone(),
            post_logout_redirect_uris: client.post_logout_redirect_uris.clone(),
            audiences: client.audiences.clone(),
            token_endpoint_auth_method: client.token_endpoint_auth_method.clone(),
            owner: client.owner,
            created_at: client.created_at,
        }
    }
}

/// Batched client lookup, scoped to the requestor's own clients. An empty
/// request array lists everything the requestor owns; a lookup miss (or a
/// client owned by someone else) is a per-element not-found and leaves its
/// siblings alone.
pub struct ReadClients;

impl<Tx: StoreTx> BatchHandler<Tx> for ReadClients {
    type Input = ReadClientRequest;

    const TX_KIND: TxKind = TxKind::Read;
    const PARAMS: BatchParams = BatchParams {
        max_requests: None,
        enable_empty: true,
    };
    const REQUIRES_REQUESTOR: bool = true;

    async fn handle(
        &mut self,
        tx: &mut Tx,
        requestor: Option<&Identity>,
        input: Option<&ReadClientRequest>,
    ) -> Result<Outcome, BatchAbort> {
        let requestor = requestor
            .ok_or_else(|| BatchAbort::internal(anyhow!("requestor missing after gate")))?;
        let clients = match input {
            None => tx.fetch_clients(requestor.id, None).await?,
            Some(request) => {
                let clients = tx.fetch_clients(requestor.id, Some(&[request.id])).await?;
                if clients.is_empty() {
                    return Ok(Outcome::ClientError(ENTITY_NOT_FOUND));
                }
                clients
            }
        };
        let summaries: Vec<ClientSummary> = clients.iter().map(ClientSummary::from).collect();
        Outcome::ok(&summaries)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Caller-supplied credential. Confidential clients without one get a
    /// generated credential instead.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default)]
    pub audiences: Vec<String>,
    pub token_endpoint_auth_method: String,
    /// Public clients (browser, native) hold no credential at all.
    #[serde(default)]
    pub is_public: bool,
}

impl Validate for CreateClientRequest {
    fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            bail!("client name must not be empty");
        }
        if self.is_public && self.secret.is_some() {
            bail!("public clients cannot carry a secret");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct CreateClientResponse {
    #[serde(flatten)]
    pub client: ClientSummary,
    /// Plaintext credential, surfaced exactly once at creation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Batched client creation, capped at one element per call. The requestor
/// becomes the owner of every created client.
pub struct CreateClients {
    keyring: Keyring,
    issuer: String,
    created: Vec<MirrorClient>,
    creator: Option<IdentityId>,
}

impl CreateClients {
    pub fn new(keyring: Keyring, issuer: impl Into<String>) -> Self {
        Self {
            keyring,
            issuer: issuer.into(),
            created: Vec::new(),
            creator: None,
        }
    }
}

impl<Tx: StoreTx> BatchHandler<Tx> for CreateClients {
    type Input = CreateClientRequest;

    const TX_KIND: TxKind = TxKind::Write;
    const PARAMS: BatchParams = BatchParams {
        max_requests: Some(1),
        enable_empty: false,
    };
    const REQUIRES_REQUESTOR: bool = true;

    async fn handle(
        &mut self,
        tx: &mut Tx,
        requestor: Option<&Identity>,
        input: Option<&CreateClientRequest>,
    ) -> Result<Outcome, BatchAbort> {
        let requestor = requestor
            .ok_or_else(|| BatchAbort::internal(anyhow!("requestor missing after gate")))?;
        let request = input
            .ok_or_else(|| BatchAbort::internal(anyhow!("empty slot on a non-empty kind")))?;

        let plaintext = if request.is_public {
            None
        } else {
            Some(
                request
                    .secret
                    .clone()
                    .unwrap_or_else(|| generate_secret(GENERATED_SECRET_LEN)),
            )
        };
        let encrypted = match &plaintext {
            Some(secret) => Some(
                self.keyring
                    .encrypt(secret)
                    .map_err(|err| BatchAbort::from(LibError::from(err)))?,
            ),
            None => None,
        };

        let client = tx
            .create_client(NewClient {
                issuer: self.issuer.clone(),
                name: request.name.clone(),
                description: request.description.clone(),
                secret: encrypted,
                grant_types: request.grant_types.clone(),
                response_types: request.response_types.clone(),
                redirect_uris: request.redirect_uris.clone(),
                post_logout_redirect_uris: request.post_logout_redirect_uris.clone(),
                audiences: request.audiences.clone(),
                token_endpoint_auth_method: request.token_endpoint_auth_method.clone(),
                owner: requestor.id,
            })
            .await?;

        self.created.push(MirrorClient {
            id: client.id,
            name: client.name.clone(),
            secret: plaintext.clone(),
            grant_types: client.grant_types.clone(),
            response_types: client.response_types.clone(),
            redirect_uris: client.redirect_uris.clone(),
            post_logout_redirect_uris: client.post_logout_redirect_uris.clone(),
            audiences: client.audiences.clone(),
            token_endpoint_auth_method: client.token_endpoint_auth_method.clone(),
        });
        self.creator = Some(requestor.id);

        Outcome::ok(&CreateClientResponse {
            client: ClientSummary::from(&client),
            secret: plaintext,
        })
    }

    fn check_outputs(&self, outcomes: &[Outcome]) -> anyhow::Result<()> {
        require_all_ok(outcomes)
    }

    fn take_effects(&mut self) -> Option<BatchEffects> {
        if self.created.is_empty() {
            return None;
        }
        Some(BatchEffects {
            created: std::mem::take(&mut self.created),
            deleted: Vec::new(),
            creator: self.creator,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteClientRequest {
    pub id: ClientId,
}

impl Validate for DeleteClientRequest {}

#[derive(Debug, Serialize)]
pub struct DeleteClientResponse {
    pub id: ClientId,
}

/// Batched client deletion, capped at one element per call. Only the owner
/// may delete; a missing target fails the whole batch.
pub struct DeleteClients {
    deleted: Vec<ClientId>,
}

impl DeleteClients {
    pub fn new() -> Self {
        Self { deleted: Vec::new() }
    }
}

impl Default for DeleteClients {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tx: StoreTx> BatchHandler<Tx> for DeleteClients {
    type Input = DeleteClientRequest;

    const TX_KIND: TxKind = TxKind::Write;
    const PARAMS: BatchParams = BatchParams {
        max_requests: Some(1),
        enable_empty: false,
    };
    const REQUIRES_REQUESTOR: bool = true;

    async fn handle(
        &mut self,
        tx: &mut Tx,
        requestor: Option<&Identity>,
        input: Option<&DeleteClientRequest>,
    ) -> Result<Outcome, BatchAbort> {
        let requestor = requestor
            .ok_or_else(|| BatchAbort::internal(anyhow!("requestor missing after gate")))?;
        let request = input
            .ok_or_else(|| BatchAbort::internal(anyhow!("empty slot on a non-empty kind")))?;

        let Some(client) = tx.delete_client(request.id).await? else {
            return Err(BatchAbort::client(
                ENTITY_NOT_FOUND,
                anyhow!("client {} does not exist", request.id),
            ));
        };
        if client.owner != requestor.id {
            return Err(BatchAbort::client(
                ACCESS_DENIED,
                anyhow!("requestor {} does not own client {}", requestor.id, client.id),
            ));
        }

        self.deleted.push(client.id);
        Outcome::ok(&DeleteClientResponse { id: client.id })
    }

    fn check_outputs(&self, outcomes: &[Outcome]) -> anyhow::Result<()> {
        require_all_ok(outcomes)
    }

    fn take_effects(&mut self) -> Option<BatchEffects> {
        if self.deleted.is_empty() {
            return None;
        }
        Some(BatchEffects {
            created: Vec::new(),
            deleted: std::mem::take(&mut self.deleted),
            creator: None,
        })
    }
}
