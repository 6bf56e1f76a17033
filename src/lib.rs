#[cfg(feature = "api")]
pub mod api;
pub mod bulk;
pub mod cipher;
pub mod clients;
pub mod context;
pub mod error;
pub mod follows;
pub mod invites;
pub mod models;
#[cfg(feature = "sqlx")]
pub mod pg;
pub mod propagate;
pub mod store;
#[cfg(test)]
pub(crate) mod testutil;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, RequestorSub, routes};
    pub use crate::bulk::{
        Batch, BatchAbort, BatchHandler, BatchParams, BatchResult, BulkResponse, Outcome,
        Validate, execute_batch,
    };
    pub use crate::cipher::{CipherError, CipherKey, Keyring, generate_secret};
    pub use crate::clients::{CreateClients, DeleteClients, ReadClients};
    pub use crate::context::{IdpApp, ServiceContext};
    pub use crate::error::{ErrorCode, ErrorKind, LibError, Result};
    pub use crate::follows::{CreateFollows, ReadFollows};
    pub use crate::invites::{CreateInvites, ReadInvites};
    pub use crate::models::{
        Client, ClientId, Follow, Identity, IdentityId, Invite, InviteFilter, InviteId,
        NewClient,
    };
    #[cfg(feature = "sqlx")]
    pub use crate::pg::{PgStore, PgTx, create_idp_tables};
    pub use crate::propagate::{
        AuthzMirror, BatchEffects, BroadcastEvents, DomainEvent, EventPublisher, MirrorClient,
        PolicyMirror, PropagationStatus, Propagator,
    };
    pub use crate::store::{Store, StoreTx, TxKind};
}
