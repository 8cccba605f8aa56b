//! The HTTP endpoint serving GraphQL requests.
use std::net::SocketAddr;

use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use http::HeaderMap;
use http::StatusCode;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::context::Context;
use crate::graphql;
use crate::json_ext::Object;
use crate::process::SchemaHandle;
use crate::value::FieldValue;

#[derive(Clone)]
struct ServerState {
    schemas: SchemaHandle,
    root: FieldValue,
}

/// The routes of the gateway: `/graphql` for queries and `/health`.
///
/// Requests are executed against the schema active in `schemas` when they arrive, with `root`
/// as the value of the root operation type.
pub fn router(schemas: SchemaHandle, root: FieldValue) -> Router {
    Router::new()
        .route("/graphql", get(handle_get).post(handle_post))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState { schemas, root })
}

/// Serves [`router`] on `listen` until ctrl-c.
pub async fn serve(listen: SocketAddr, schemas: SchemaHandle, root: FieldValue) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(address = %listener.local_addr()?, "GraphQL endpoint exposed");
    axum::serve(listener, router(schemas, root))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "could not listen for ctrl-c");
            }
            tracing::info!("shutting down");
        })
        .await
}

async fn health() -> Json<bool> {
    Json(true)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRequest {
    query: String,
    operation_name: Option<String>,
    /// JSON encoded.
    variables: Option<String>,
}

async fn handle_get(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(request): Query<GetRequest>,
) -> Response {
    let variables = match request.variables.as_deref().filter(|v| !v.is_empty()) {
        Some(variables) => match serde_json::from_str::<Option<Object>>(variables) {
            Ok(variables) => variables.unwrap_or_default(),
            Err(err) => {
                return bad_request(format!("invalid variables: {err}"));
            }
        },
        None => Object::new(),
    };
    let request = graphql::Request::builder()
        .query(request.query)
        .and_operation_name(request.operation_name)
        .variables(variables)
        .build();
    execute(&state, headers, request).await
}

async fn handle_post(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<graphql::Request>,
) -> Response {
    execute(&state, headers, request).await
}

async fn execute(state: &ServerState, headers: HeaderMap, request: graphql::Request) -> Response {
    let Some(schema) = state.schemas.get() else {
        let error = graphql::Error::builder()
            .message("no schema has been loaded yet")
            .extension_code("SCHEMA_UNAVAILABLE")
            .build();
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(graphql::Response::from_errors(vec![error])),
        )
            .into_response();
    };
    let response = schema
        .execute(request, state.root.clone(), Context::with_headers(headers))
        .await;
    Json(response).into_response()
}

fn bad_request(message: String) -> Response {
    let error = graphql::Error::builder()
        .message(message)
        .extension_code("BAD_REQUEST")
        .build();
    (
        StatusCode::BAD_REQUEST,
        Json(graphql::Response::from_errors(vec![error])),
    )
        .into_response()
}
