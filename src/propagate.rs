//! Post-commit propagation to external collaborators.
//!
//! After a batch commits, its material effects are mirrored to the OAuth2
//! authorization server, the access-policy service, and the event bus. All
//! of this is best-effort: the local commit is already durable, so a failed
//! arm is logged for reconciliation and never unwinds the transaction.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};

use crate::models::{ClientId, IdentityId};

/// Client material needed to provision the authorization-server mirror.
/// `secret` is the plaintext credential, captured before the cipher boundary;
/// it exists only in memory for the propagation window.
#[derive(Debug, Clone)]
pub struct MirrorClient {
    pub id: ClientId,
    pub name: String,
    pub secret: Option<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub audiences: Vec<String>,
    pub token_endpoint_auth_method: String,
}

/// Material effects of one committed batch, handed from the coordinator to
/// the propagator.
#[derive(Debug, Clone, Default)]
pub struct BatchEffects {
    pub created: Vec<MirrorClient>,
    pub deleted: Vec<ClientId>,
    /// Owner to grant policy rights over `created` entries.
    pub creator: Option<IdentityId>,
}

impl BatchEffects {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ClientCreated { id: ClientId },
    ClientDeleted { id: ClientId },
}

/// Mirror of client registrations held by the OAuth2 authorization server.
pub trait AuthzMirror: Send + Sync {
    fn create_client(
        &self,
        client: &MirrorClient,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn delete_client(&self, id: ClientId) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Access-policy service holding ownership grants over clients.
pub trait PolicyMirror: Send + Sync {
    fn grant_ownership(
        &self,
        owner: IdentityId,
        client: ClientId,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn drop_client(&self, client: ClientId) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &DomainEvent) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationStatus {
    Propagated,
    /// Some arms failed; each failure was logged with enough context to
    /// reconcile the mirror by hand or by a sweep job.
    PartiallyPropagated { failed: usize },
}

/// Fans one batch's effects out to all three collaborator arms. Arms are
/// independent: one failure never skips the others.
pub struct Propagator<A, P, E> {
    pub authz: A,
    pub policy: P,
    pub events: E,
}

impl<A: AuthzMirror, P: PolicyMirror, E: EventPublisher> Propagator<A, P, E> {
    pub async fn run(&self, effects: BatchEffects) -> PropagationStatus {
        let mut failed = 0usize;

        for client in &effects.created {
            if let Err(err) = self.authz.create_client(client).await {
                tracing::warn!(client_id = %client.id, error = %err,
                    "authorization-server mirror create failed, needs reconciliation");
                failed += 1;
            }
            if let Some(owner) = effects.creator {
                if let Err(err) = self.policy.grant_ownership(owner, client.id).await {
                    tracing::warn!(client_id = %client.id, owner = %owner, error = %err,
                        "policy ownership grant failed, needs reconciliation");
                    failed += 1;
                }
            }
            if let Err(err) = self
                .events
                .publish(&DomainEvent::ClientCreated { id: client.id })
                .await
            {
                tracing::warn!(client_id = %client.id, error = %err, "event publish failed");
                failed += 1;
            }
        }

        for id in &effects.deleted {
            if let Err(err) = self.authz.delete_client(*id).await {
                tracing::warn!(client_id = %id, error = %err,
                    "authorization-server mirror delete failed, needs reconciliation");
                failed += 1;
            }
            if let Err(err) = self.policy.drop_client(*id).await {
                tracing::warn!(client_id = %id, error = %err,
                    "policy cleanup failed, needs reconciliation");
                failed += 1;
            }
            if let Err(err) = self
                .events
                .publish(&DomainEvent::ClientDeleted { id: *id })
                .await
            {
                tracing::warn!(client_id = %id, error = %err, "event publish failed");
                failed += 1;
            }
        }

        if failed == 0 {
            PropagationStatus::Propagated
        } else {
            PropagationStatus::PartiallyPropagated { failed }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Client-credentials token source shared by the HTTP mirror arms. Tokens
/// are cached until shortly before expiry.
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> anyhow::Result<String> {
        {
            let cached = self.cached.lock().await;
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.expires_at {
                    return Ok(token.access_token.clone());
                }
            }
        }

        // The lock is released during the fetch so one slow token endpoint
        // cannot stall unrelated propagation arms. Concurrent refreshes may
        // duplicate the request; the last writer wins.
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = response.json().await?;

        // Refresh a minute early to avoid handing out nearly-expired tokens.
        let ttl = token.expires_in.unwrap_or(300).saturating_sub(60).max(30);
        *self.cached.lock().await = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(token.access_token)
    }
}

#[derive(Debug, Serialize)]
struct AuthzClientBody<'a> {
    client_id: String,
    client_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
    grant_types: &'a [String],
    response_types: &'a [String],
    redirect_uris: &'a [String],
    post_logout_redirect_uris: &'a [String],
    audience: &'a [String],
    token_endpoint_auth_method: &'a str,
}

/// Mirror arm talking to the authorization server's admin API.
pub struct HttpAuthzMirror {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthzMirror {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl AuthzMirror for HttpAuthzMirror {
    async fn create_client(&self, client: &MirrorClient) -> anyhow::Result<()> {
        let body = AuthzClientBody {
            client_id: client.id.to_string(),
            client_name: &client.name,
            client_secret: client.secret.as_deref(),
            grant_types: &client.grant_types,
            response_types: &client.response_types,
            redirect_uris: &client.redirect_uris,
            post_logout_redirect_uris: &client.post_logout_redirect_uris,
            audience: &client.audiences,
            token_endpoint_auth_method: &client.token_endpoint_auth_method,
        };
        self.http
            .post(format!("{}/clients", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_client(&self, id: ClientId) -> anyhow::Result<()> {
        self.http
            .delete(format!("{}/clients/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Mirror arm talking to the access-policy service.
pub struct HttpPolicyMirror {
    http: reqwest::Client,
    base_url: String,
    credentials: std::sync::Arc<ClientCredentials>,
}

impl HttpPolicyMirror {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: std::sync::Arc<ClientCredentials>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            credentials,
        }
    }
}

#[derive(Debug, Serialize)]
struct GrantBody {
    owner: String,
    scope: &'static str,
    target: String,
}

impl PolicyMirror for HttpPolicyMirror {
    async fn grant_ownership(&self, owner: IdentityId, client: ClientId) -> anyhow::Result<()> {
        let token = self.credentials.access_token().await?;
        self.http
            .post(format!("{}/grants", self.base_url))
            .bearer_auth(token)
            .json(&GrantBody {
                owner: owner.to_string(),
                scope: "idp:client:owner",
                target: client.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn drop_client(&self, client: ClientId) -> anyhow::Result<()> {
        let token = self.credentials.access_token().await?;
        self.http
            .delete(format!("{}/grants/{client}", self.base_url))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// In-process event bus over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastEvents {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastEvents {
    async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        // No live subscribers is not a failure; events are advisory.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}
