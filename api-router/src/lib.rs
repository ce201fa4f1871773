#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

use api_state::ApiState;
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use middleware_auth::resolve_principal;
use routes::{
    admin::{audit_log, create_policy, delete_policy, list_policies},
    consult::consult,
    ingest::{ingest_document, ingest_turn},
    liveness::live,
    readiness::ready,
    workspaces::{
        accept_invitation, create_share_link, create_workspace, decline_invitation, invite,
        join_via_token, list_members, remove_member,
    },
};

pub mod api_state;
pub mod error;
pub mod middleware_auth;
mod routes;

/// Uploads are capped at 10 MiB plus headroom for the base64 envelope.
const MAX_INGEST_BODY_BYTES: usize = 15 * 1024 * 1024;

/// Router for API functionality, version 1
pub fn api_routes_v1(app_state: &ApiState) -> Router {
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Everything else resolves a principal first; unauthenticated requests
    // proceed as `anonymous` and fail wherever a user is required.
    let protected = Router::new()
        .route("/ingest/turn", post(ingest_turn))
        .route(
            "/ingest/document",
            post(ingest_document).layer(DefaultBodyLimit::max(MAX_INGEST_BODY_BYTES)),
        )
        .route("/consult", post(consult))
        .route("/workspaces", post(create_workspace))
        .route("/workspaces/{ws}/invite", post(invite))
        .route("/invitations/{id}/accept", post(accept_invitation))
        .route("/invitations/{id}/decline", post(decline_invitation))
        .route("/workspaces/{ws}/share-link", post(create_share_link))
        .route("/join/{token}", post(join_via_token))
        .route("/workspaces/{ws}/members", get(list_members))
        .route("/workspaces/{ws}/members/{user}", delete(remove_member))
        .route("/admin/policies", get(list_policies).post(create_policy))
        .route("/admin/policies/{id}", delete(delete_policy))
        .route("/admin/audit", get(audit_log))
        .route_layer(from_fn_with_state(app_state.clone(), resolve_principal));

    public.merge(protected).with_state(app_state.clone())
}
