//! Invite endpoints: batched create and read of time-boxed invitations,
//! addressed to an email or an already-known identity.

use anyhow::anyhow;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bulk::{BatchAbort, BatchHandler, BatchParams, Outcome, Validate, require_all_ok};
use crate::models::{Identity, IdentityId, Invite, InviteFilter, InviteId};
use crate::store::{StoreTx, TxKind};

/// Default invite lifetime: seven days.
const INVITE_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub invited: Option<IdentityId>,
    #[serde(default)]
    pub hint_username: Option<String>,
    /// Lifetime override in seconds; the default is seven days.
    #[serde(default)]
    pub ttl: Option<i64>,
}

impl Validate for CreateInviteRequest {
    fn validate(&self) -> anyhow::Result<()> {
        if self.email.is_none() && self.invited.is_none() {
            anyhow::bail!("invite needs an email or an invited identity");
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                anyhow::bail!("invite email is not an address");
            }
        }
        if let Some(ttl) = self.ttl {
            if ttl <= 0 {
                anyhow::bail!("invite ttl must be positive");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteSummary {
    pub id: InviteId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited: Option<IdentityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_username: Option<String>,
    pub invited_by: IdentityId,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

impl From<&Invite> for InviteSummary {
    fn from(invite: &Invite) -> Self {
        Self {
            id: invite.id,
            email: invite.email.clone(),
            invited: invite.invited,
            hint_username: invite.hint_username.clone(),
            invited_by: invite.invited_by,
            issued_at: invite.issued_at.timestamp(),
            expires_at: invite.expires_at.timestamp(),
        }
    }
}

/// Batched invite creation. The requestor is stamped as the inviter.
pub struct CreateInvites;

impl<Tx: StoreTx> BatchHandler<Tx> for CreateInvites {
    type Input = CreateInviteRequest;

    const TX_KIND: TxKind = TxKind::Write;
    const PARAMS: BatchParams = BatchParams {
        max_requests: None,
        enable_empty: false,
    };
    const REQUIRES_REQUESTOR: bool = true;

    async fn handle(
        &mut self,
        tx: &mut Tx,
        requestor: Option<&Identity>,
        input: Option<&CreateInviteRequest>,
    ) -> Result<Outcome, BatchAbort> {
        let requestor = requestor
            .ok_or_else(|| BatchAbort::internal(anyhow!("requestor missing after gate")))?;
        let request = input
            .ok_or_else(|| BatchAbort::internal(anyhow!("empty slot on a non-empty kind")))?;

        let issued_at = Utc::now();
        let ttl = Duration::seconds(request.ttl.unwrap_or(INVITE_TTL_SECS));
        let invite = tx
            .create_invite(Invite {
                id: InviteId(Uuid::new_v4()),
                email: request.email.clone(),
                invited: request.invited,
                hint_username: request.hint_username.clone(),
                invited_by: requestor.id,
                issued_at,
                expires_at: issued_at + ttl,
            })
            .await?;

        Outcome::ok(&InviteSummary::from(&invite))
    }

    fn check_outputs(&self, outcomes: &[Outcome]) -> anyhow::Result<()> {
        require_all_ok(outcomes)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReadInviteRequest {
    #[serde(default)]
    pub id: Option<InviteId>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Validate for ReadInviteRequest {}

/// Batched invite lookup. An empty request array lists every invite.
pub struct ReadInvites;

impl<Tx: StoreTx> BatchHandler<Tx> for ReadInvites {
    type Input = ReadInviteRequest;

    const TX_KIND: TxKind = TxKind::Read;
    const PARAMS: BatchParams = BatchParams {
        max_requests: None,
        enable_empty: true,
    };

    async fn handle(
        &mut self,
        tx: &mut Tx,
        _requestor: Option<&Identity>,
        input: Option<&ReadInviteRequest>,
    ) -> Result<Outcome, BatchAbort> {
        let filter = input
            .map(|request| InviteFilter {
                id: request.id,
                email: request.email.clone(),
            })
            .unwrap_or_default();
        let invites = tx.fetch_invites(filter).await?;
        let summaries: Vec<InviteSummary> = invites.iter().map(InviteSummary::from).collect();
        Outcome::ok(&summaries)
    }
}
