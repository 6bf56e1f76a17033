//! HTTP surface for the batch endpoints. Request bodies are JSON arrays;
//! responses are ordered JSON arrays with one element per input index.
//!
//! Authentication is middleware territory: something upstream validates the
//! bearer token and stashes its subject claim as a [`RequestorSub`] request
//! extension. Here the subject is only resolved against the identity table.

use axum::extract::{FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::bulk::{Batch, BatchHandler, BulkResponse, execute_batch};
use crate::clients::{
    CreateClientRequest, CreateClients, DeleteClientRequest, DeleteClients, ReadClientRequest,
    ReadClients,
};
use crate::context::IdpApp;
use crate::error::{ErrorKind, LibError};
use crate::follows::{CreateFollowRequest, CreateFollows, ReadFollowRequest, ReadFollows};
use crate::invites::{CreateInviteRequest, CreateInvites, ReadInviteRequest, ReadInvites};
use crate::store::Store;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Cipher => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(kind = ?self.0.kind, error = %self.0.source, "idp api request failed");
        (status, self.0.public).into_response()
    }
}

/// Bearer subject claim, inserted by the authentication middleware. Absent
/// when the call is anonymous or the middleware is not mounted.
#[derive(Debug, Clone, Default)]
pub struct RequestorSub(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for RequestorSub {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RequestorSub>().cloned().unwrap_or_default())
    }
}

async fn run_batch<S, H>(
    app: &S,
    sub: RequestorSub,
    inputs: Vec<H::Input>,
    handler: H,
) -> Json<Vec<BulkResponse>>
where
    S: IdpApp,
    H: BatchHandler<<S::Store as Store>::Tx>,
{
    let batch = match Batch::new(inputs, H::PARAMS) {
        Ok(batch) => batch,
        Err(responses) => return Json(responses),
    };
    let result = execute_batch(app.store(), sub.0.as_deref(), batch, handler).await;
    if let Some(effects) = result.effects {
        app.propagate(effects);
    }
    Json(result.responses)
}

async fn read_clients_handler<S: IdpApp>(
    State(app): State<S>,
    sub: RequestorSub,
    Json(inputs): Json<Vec<ReadClientRequest>>,
) -> impl IntoResponse {
    run_batch(&app, sub, inputs, ReadClients).await
}

async fn create_clients_handler<S: IdpApp>(
    State(app): State<S>,
    sub: RequestorSub,
    Json(inputs): Json<Vec<CreateClientRequest>>,
) -> impl IntoResponse {
    let handler = CreateClients::new(app.keyring().clone(), app.issuer());
    run_batch(&app, sub, inputs, handler).await
}

async fn delete_clients_handler<S: IdpApp>(
    State(app): State<S>,
    sub: RequestorSub,
    Json(inputs): Json<Vec<DeleteClientRequest>>,
) -> impl IntoResponse {
    run_batch(&app, sub, inputs, DeleteClients::new()).await
}

async fn read_follows_handler<S: IdpApp>(
    State(app): State<S>,
    sub: RequestorSub,
    Json(inputs): Json<Vec<ReadFollowRequest>>,
) -> impl IntoResponse {
    run_batch(&app, sub, inputs, ReadFollows).await
}

async fn create_follows_handler<S: IdpApp>(
    State(app): State<S>,
    sub: RequestorSub,
    Json(inputs): Json<Vec<CreateFollowRequest>>,
) -> impl IntoResponse {
    run_batch(&app, sub, inputs, CreateFollows).await
}

async fn read_invites_handler<S: IdpApp>(
    State(app): State<S>,
    sub: RequestorSub,
    Json(inputs): Json<Vec<ReadInviteRequest>>,
) -> impl IntoResponse {
    run_batch(&app, sub, inputs, ReadInvites).await
}

async fn create_invites_handler<S: IdpApp>(
    State(app): State<S>,
    sub: RequestorSub,
    Json(inputs): Json<Vec<CreateInviteRequest>>,
) -> impl IntoResponse {
    run_batch(&app, sub, inputs, CreateInvites).await
}

pub fn routes<S: IdpApp>() -> Router<S> {
    tracing::info!("Registering route /clients [GET,POST,DELETE]");
    tracing::info!("Registering route /follows [GET,POST]");
    tracing::info!("Registering route /invites [GET,POST]");

    Router::new()
        .route(
            "/clients",
            get(read_clients_handler::<S>)
                .post(create_clients_handler::<S>)
                .delete(delete_clients_handler::<S>),
        )
        .route(
            "/follows",
            get(read_follows_handler::<S>).post(create_follows_handler::<S>),
        )
        .route(
            "/invites",
            get(read_invites_handler::<S>).post(create_invites_handler::<S>),
        )
}
