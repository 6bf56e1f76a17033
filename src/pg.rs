//! Postgres implementation of the store traits. Everything runs through an
//! explicit transaction; `create_follow` relies on `ON CONFLICT DO NOTHING`
//! for edge identity, and secrets cross this module only as opaque
//! ciphertext.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    Client, ClientId, Follow, Identity, IdentityId, Invite, InviteFilter, InviteId, NewClient,
};
use crate::store::{Store, StoreTx, TxKind};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_idp_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct IdentityRow {
    id: Uuid,
    issuer: String,
    username: String,
    created_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(value: IdentityRow) -> Self {
        Self {
            id: IdentityId(value.id),
            issuer: value.issuer,
            username: value.username,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct ClientRow {
    id: Uuid,
    issuer: String,
    name: String,
    description: Option<String>,
    secret: Option<String>,
    grant_types: Vec<String>,
    response_types: Vec<String>,
    redirect_uris: Vec<String>,
    post_logout_redirect_uris: Vec<String>,
    audiences: Vec<String>,
    token_endpoint_auth_method: String,
    owner_identity_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<ClientRow> for Client {
    fn from(value: ClientRow) -> Self {
        Self {
            id: ClientId(value.id),
            issuer: value.issuer,
            name: value.name,
            description: value.description,
            secret: value.secret,
            grant_types: value.grant_types,
            response_types: value.response_types,
            redirect_uris: value.redirect_uris,
            post_logout_redirect_uris: value.post_logout_redirect_uris,
            audiences: value.audiences,
            token_endpoint_auth_method: value.token_endpoint_auth_method,
            owner: IdentityId(value.owner_identity_id),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct FollowRow {
    from_identity_id: Uuid,
    to_identity_id: Uuid,
}

impl From<FollowRow> for Follow {
    fn from(value: FollowRow) -> Self {
        Self {
            from: IdentityId(value.from_identity_id),
            to: IdentityId(value.to_identity_id),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct InviteRow {
    id: Uuid,
    email: Option<String>,
    invited_identity_id: Option<Uuid>,
    hint_username: Option<String>,
    invited_by: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<InviteRow> for Invite {
    fn from(value: InviteRow) -> Self {
        Self {
            id: InviteId(value.id),
            email: value.email,
            invited: value.invited_identity_id.map(IdentityId),
            hint_username: value.hint_username,
            invited_by: IdentityId(value.invited_by),
            issued_at: value.issued_at,
            expires_at: value.expires_at,
        }
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

const CLIENT_COLUMNS: &str = r#"
    id, issuer, name, description, secret,
    grant_types, response_types, redirect_uris, post_logout_redirect_uris,
    audiences, token_endpoint_auth_method, owner_identity_id, created_at
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self, kind: TxKind) -> Result<PgTx> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to open transaction", err))?;
        if kind == TxKind::Read {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|err| db_err("Failed to open transaction", err))?;
        }
        Ok(PgTx { tx })
    }
}

/// One Postgres transaction. sqlx rolls back on drop, so an unterminated
/// transaction never leaks its writes.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx for PgTx {
    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|err| db_err("Failed to roll back transaction", err))
    }

    async fn fetch_identities(&mut self, ids: &[IdentityId]) -> Result<Vec<Identity>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query_as::<_, IdentityRow>(
            r#"
            SELECT id, issuer, username, created_at
            FROM idp.identities
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to query identities", err))?;

        Ok(rows.into_iter().map(Identity::from).collect())
    }

    async fn fetch_clients(
        &mut self,
        owner: IdentityId,
        ids: Option<&[ClientId]>,
    ) -> Result<Vec<Client>> {
        let rows = match ids {
            Some(ids) => {
                let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
                sqlx::query_as::<_, ClientRow>(&format!(
                    r#"
                    SELECT {CLIENT_COLUMNS}
                    FROM idp.clients
                    WHERE owner_identity_id = $1
                      AND id = ANY($2)
                    "#
                ))
                .bind(owner.0)
                .bind(&ids)
                .fetch_all(&mut *self.tx)
                .await
            }
            None => {
                sqlx::query_as::<_, ClientRow>(&format!(
                    r#"
                    SELECT {CLIENT_COLUMNS}
                    FROM idp.clients
                    WHERE owner_identity_id = $1
                    ORDER BY created_at
                    "#
                ))
                .bind(owner.0)
                .fetch_all(&mut *self.tx)
                .await
            }
        }
        .map_err(|err| db_err("Failed to query clients", err))?;

        Ok(rows.into_iter().map(Client::from).collect())
    }

    async fn create_client(&mut self, client: NewClient) -> Result<Client> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            r#"
            INSERT INTO idp.clients (
                id, issuer, name, description, secret,
                grant_types, response_types, redirect_uris,
                post_logout_redirect_uris, audiences,
                token_endpoint_auth_method, owner_identity_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&client.issuer)
        .bind(&client.name)
        .bind(&client.description)
        .bind(&client.secret)
        .bind(&client.grant_types)
        .bind(&client.response_types)
        .bind(&client.redirect_uris)
        .bind(&client.post_logout_redirect_uris)
        .bind(&client.audiences)
        .bind(&client.token_endpoint_auth_method)
        .bind(client.owner.0)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to create client", err))?;

        Ok(Client::from(row))
    }

    async fn delete_client(&mut self, id: ClientId) -> Result<Option<Client>> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "DELETE FROM idp.clients WHERE id = $1 RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to delete client", err))?;

        Ok(row.map(Client::from))
    }

    async fn create_follow(
        &mut self,
        from: IdentityId,
        to: IdentityId,
    ) -> Result<Option<Follow>> {
        let row = sqlx::query_as::<_, FollowRow>(
            r#"
            INSERT INTO idp.follows (from_identity_id, to_identity_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            RETURNING from_identity_id, to_identity_id
            "#,
        )
        .bind(from.0)
        .bind(to.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to create follow", err))?;

        Ok(row.map(Follow::from))
    }

    async fn fetch_follows(&mut self, from: Option<IdentityId>) -> Result<Vec<Follow>> {
        let rows = sqlx::query_as::<_, FollowRow>(
            r#"
            SELECT from_identity_id, to_identity_id
            FROM idp.follows
            WHERE $1::uuid IS NULL OR from_identity_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(from.map(|id| id.0))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to query follows", err))?;

        Ok(rows.into_iter().map(Follow::from).collect())
    }

    async fn create_invite(&mut self, invite: Invite) -> Result<Invite> {
        let row = sqlx::query_as::<_, InviteRow>(
            r#"
            INSERT INTO idp.invites (
                id, email, invited_identity_id, hint_username,
                invited_by, issued_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, email, invited_identity_id, hint_username,
                      invited_by, issued_at, expires_at
            "#,
        )
        .bind(invite.id.0)
        .bind(&invite.email)
        .bind(invite.invited.map(|id| id.0))
        .bind(&invite.hint_username)
        .bind(invite.invited_by.0)
        .bind(invite.issued_at)
        .bind(invite.expires_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to create invite", err))?;

        Ok(Invite::from(row))
    }

    async fn fetch_invites(&mut self, filter: InviteFilter) -> Result<Vec<Invite>> {
        let rows = sqlx::query_as::<_, InviteRow>(
            r#"
            SELECT id, email, invited_identity_id, hint_username,
                   invited_by, issued_at, expires_at
            FROM idp.invites
            WHERE ($1::uuid IS NULL OR id = $1)
              AND ($2::text IS NULL OR email = $2)
            ORDER BY issued_at
            "#,
        )
        .bind(filter.id.map(|id| id.0))
        .bind(&filter.email)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|err| db_err("Failed to query invites", err))?;

        Ok(rows.into_iter().map(Invite::from).collect())
    }
}
