use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::device::Device;
use crate::device::Schedule;
use crate::error::RegistryError;
use crate::error::RegistryResult;
use crate::service::DeviceService;
use crate::service::OwnerAction;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Shared application state
struct AppState {
    version: &'static str,
    devices: Arc<DeviceService>,
}

/// `?filter=users&user=<email>`
#[derive(Debug, Deserialize)]
struct ListQuery {
    filter: Option<String>,
    user: Option<String>,
}

/// `?path=config|users&action=replace|append`
#[derive(Debug, Deserialize)]
struct PatchQuery {
    path: Option<String>,
    action: Option<String>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /api/devices
#[tracing::instrument(skip(state))]
async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> RegistryResult<Json<Vec<Device>>> {
    match query.filter.as_deref() {
        Some("users") => {
            let owner = query.user.as_deref().unwrap_or_default();
            Ok(Json(state.devices.list_by_owner(owner).await?))
        }
        _ => Err(RegistryError::MethodNotAllowed),
    }
}

/// Handler for POST /api/devices
#[tracing::instrument(skip_all)]
async fn create_device(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> RegistryResult<Json<Device>> {
    let device: Device = serde_json::from_slice(&body)?;
    Ok(Json(state.devices.create(device).await?))
}

/// Handler for GET /api/devices/{device_id}
#[tracing::instrument(skip(state))]
async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> RegistryResult<Json<Device>> {
    Ok(Json(state.devices.resolve(&device_id).await?))
}

/// Handler for DELETE /api/devices/{device_id}
#[tracing::instrument(skip(state))]
async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> RegistryResult<StatusCode> {
    state.devices.delete(&device_id).await?;
    Ok(StatusCode::OK)
}

/// Handler for PATCH /api/devices/{device_id}
#[tracing::instrument(skip(state, body))]
async fn patch_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<PatchQuery>,
    body: Bytes,
) -> RegistryResult<Json<Device>> {
    // The target must exist before the body or the action are looked at
    let target = state.devices.resolve(&device_id).await?;
    let mac = target.mac.as_str();

    let device = match (query.path.as_deref(), query.action.as_deref()) {
        (Some("config"), Some("replace")) => {
            let schedule: Schedule = serde_json::from_slice(&body)?;
            state.devices.replace_config(mac, schedule).await?
        }
        (Some("users"), action) => {
            let owners: Vec<String> = serde_json::from_slice(&body)?;
            let action = action
                .and_then(|a| a.parse::<OwnerAction>().ok())
                .ok_or(RegistryError::MethodNotAllowed)?;
            state.devices.patch_owners(mac, owners, action).await?
        }
        _ => return Err(RegistryError::MethodNotAllowed),
    };
    Ok(Json(device))
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>, cors: bool) -> Router {
    let router = Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/api/devices", get(list_devices).post(create_device))
        .route(
            "/api/devices/:device_id",
            get(get_device).patch(patch_device).delete(delete_device),
        )
        .layer(TraceLayer::new_for_http());

    let router = if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the configured address and serves until `shutdown_rx` fires.
pub async fn serve(
    config: &ApiConfig,
    devices: Arc<DeviceService>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, devices });
    let app = create_router(state, config.cors);

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.listen, config.port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
