//! Runnable identity-provider server over Postgres.
//!
//! Authentication is shimmed with an `x-dev-sub` header so the batch
//! endpoints can be exercised locally without an OIDC stack; the header
//! value is inserted as the bearer subject the way a real token middleware
//! would. Mirror arms point at whatever URLs the environment names.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use axum::extract::Request;
use axum::middleware::{Next, from_fn};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use idp_core::api::{RequestorSub, routes};
use idp_core::cipher::{CipherKey, Keyring};
use idp_core::context::ServiceContext;
use idp_core::pg::{PgStore, create_idp_tables};
use idp_core::propagate::{
    BroadcastEvents, ClientCredentials, HttpAuthzMirror, HttpPolicyMirror, Propagator,
};

type DemoApp =
    Arc<ServiceContext<PgStore, HttpAuthzMirror, HttpPolicyMirror, BroadcastEvents>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL is required to run demos/idp_server.rs")?;
    let bind = env::var("IDP_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid IDP_BIND '{}'", bind))?;
    let issuer = env::var("IDP_ISSUER").unwrap_or_else(|_| "https://idp.localhost".to_string());

    let keyring = keyring_from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;
    create_idp_tables(&pool)
        .await
        .context("failed to run idp migrations")?;

    let dev_sub = env::var("IDP_DEV_SUB")
        .unwrap_or_else(|_| "00000000-0000-0000-0000-000000000001".to_string());
    seed_dev_identity(&pool, &dev_sub, &issuer).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build outbound http client")?;
    let authz_url =
        env::var("IDP_AUTHZ_URL").unwrap_or_else(|_| "http://127.0.0.1:4444".to_string());
    let policy_url =
        env::var("IDP_POLICY_URL").unwrap_or_else(|_| "http://127.0.0.1:4466".to_string());
    let token_url = env::var("IDP_POLICY_TOKEN_URL")
        .unwrap_or_else(|_| format!("{policy_url}/oauth2/token"));
    let credentials = Arc::new(ClientCredentials::new(
        http.clone(),
        token_url,
        env::var("IDP_POLICY_CLIENT_ID").unwrap_or_else(|_| "idp".to_string()),
        env::var("IDP_POLICY_CLIENT_SECRET").unwrap_or_default(),
    ));

    let events = BroadcastEvents::new(64);
    let mut event_log = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_log.recv().await {
            tracing::info!(?event, "domain event");
        }
    });

    let app_state: DemoApp = Arc::new(ServiceContext {
        store: PgStore::new(pool),
        keyring,
        issuer,
        propagator: Propagator {
            authz: HttpAuthzMirror::new(http.clone(), authz_url),
            policy: HttpPolicyMirror::new(http, policy_url, credentials),
            events,
        },
        propagation_timeout: Duration::from_secs(30),
    });

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .merge(routes::<DemoApp>());

    let app = Router::new()
        .nest("/api/v1", api_v1)
        .layer(from_fn(move |req: Request, next: Next| {
            dev_subject_middleware(dev_sub.clone(), req, next)
        }))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    println!("idp demo server listening on http://{}", bind_addr);
    println!("api base path: /api/v1");
    println!("auth shim header: x-dev-sub (defaults to IDP_DEV_SUB)");

    axum::serve(listener, app).await.context("demo server failed")
}

/// `IDP_CIPHER_KEYS` holds `id:base64key` entries separated by commas, first
/// entry is the write key. Without it a throwaway key is generated, which is
/// fine for a demo and useless for real data.
fn keyring_from_env() -> anyhow::Result<Keyring> {
    let raw = match env::var("IDP_CIPHER_KEYS") {
        Ok(raw) => raw,
        Err(_) => {
            tracing::warn!("IDP_CIPHER_KEYS unset, generating a throwaway cipher key");
            let key = CipherKey::generate("dev")?;
            return Ok(Keyring::new(vec![key])?);
        }
    };

    let mut keys = Vec::new();
    for entry in raw.split(',') {
        let (id, encoded) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("IDP_CIPHER_KEYS entry '{entry}' is not id:base64"))?;
        keys.push(CipherKey::from_base64(id.trim(), encoded)?);
    }
    Ok(Keyring::new(keys)?)
}

async fn seed_dev_identity(
    pool: &sqlx::PgPool,
    sub: &str,
    issuer: &str,
) -> anyhow::Result<()> {
    let id = Uuid::parse_str(sub).with_context(|| format!("invalid IDP_DEV_SUB '{sub}'"))?;
    sqlx::query(
        r#"
        INSERT INTO idp.identities (id, issuer, username)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(issuer)
    .bind("idp-demo")
    .execute(pool)
    .await
    .context("failed to seed dev identity")?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn dev_subject_middleware(default_sub: String, mut req: Request, next: Next) -> Response {
    let sub = req
        .headers()
        .get("x-dev-sub")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .unwrap_or(default_sub);

    req.extensions_mut().insert(RequestorSub(Some(sub)));
    next.run(req).await
}
