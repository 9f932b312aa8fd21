//! Gateway construction from configuration: backends, identity resolver,
//! shared state, and the axum router.

use crate::api::handlers::{handle_request, AppState, Limits};
use crate::api::RequestRouter;
use crate::config::{BackendConfig, Config, ConfigError};
use crate::identity::{IdentityResolver, Tenant};
use crate::multipart::MultipartTracker;
use crate::storage::{
    BlobStore, FilesystemBackend, MemoryBackend, StorageError, DEFAULT_MIN_PART_SIZE,
};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Errors that can occur while assembling the gateway.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Open the store a backend section describes.
pub async fn build_backend(backend: &BackendConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match backend {
        BackendConfig::Memory { min_part_size } => Ok(Arc::new(MemoryBackend::with_min_part_size(
            min_part_size.unwrap_or(DEFAULT_MIN_PART_SIZE),
        ))),
        BackendConfig::Filesystem {
            path,
            min_part_size,
        } => {
            let store = FilesystemBackend::with_min_part_size(
                path.clone(),
                min_part_size.unwrap_or(DEFAULT_MIN_PART_SIZE),
            )
            .await?;
            Ok(Arc::new(store))
        }
    }
}

/// Map configured access keys to their stores.
///
/// With no credentials at all the gateway runs open; otherwise every key is
/// verified and the shared backend serves anonymous requests only when
/// `allow_anonymous` is set.
pub async fn build_resolver(config: &Config) -> Result<IdentityResolver, InitError> {
    config.validate()?;
    let shared = build_backend(&config.backend).await?;

    if !config.auth_enabled() && config.tenants.is_empty() {
        return Ok(IdentityResolver::open(shared));
    }

    let mut tenants = HashMap::new();
    if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        tenants.insert(
            key.clone(),
            Tenant {
                secret_access_key: secret.clone(),
                store: Arc::clone(&shared),
            },
        );
    }
    for tenant in &config.tenants {
        tenants.insert(
            tenant.access_key_id.clone(),
            Tenant {
                secret_access_key: tenant.secret_access_key.clone(),
                store: build_backend(&tenant.backend).await?,
            },
        );
    }

    let resolver = IdentityResolver::multi(tenants);
    Ok(if config.allow_anonymous {
        resolver.allow_anonymous(shared)
    } else {
        resolver
    })
}

/// Shared state around an already-built resolver.
pub fn build_state_with(resolver: IdentityResolver, config: &Config) -> Arc<AppState> {
    Arc::new(AppState {
        resolver: Arc::new(resolver),
        multipart: Arc::new(MultipartTracker::new(config.max_object_size)),
        router: RequestRouter::new(config.virtual_host.clone()),
        limits: Limits {
            max_object_size: config.max_object_size,
            max_range_buffer: config.max_range_buffer,
            clock_skew: chrono::Duration::seconds(
                i64::try_from(config.clock_skew_secs).unwrap_or(i64::MAX / 1000),
            ),
        },
    })
}

pub async fn build_state(config: &Config) -> Result<Arc<AppState>, InitError> {
    let resolver = build_resolver(config).await?;
    info!(
        "  Auth: {}",
        if !resolver.verifies_signatures() {
            "open (signatures not checked)".to_string()
        } else {
            format!(
                "{} access key(s), anonymous {}",
                resolver.tenant_count(),
                if resolver.requires_auth() { "denied" } else { "allowed" }
            )
        }
    );
    Ok(build_state_with(resolver, config))
}

/// The axum application: every request goes to the S3 fallback handler.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.limits.max_object_size).unwrap_or(usize::MAX);
    Router::new()
        .fallback(handle_request)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
