//! HTTP server wiring: opens the configuration store, seeds it on first start,
//! builds the authorization manager and serves the ACL API.
use crate::audit::AuditLog;
use crate::authz::loader;
use crate::authz::web::AppState;
use crate::authz::{AclAdminService, AuthorizationManager};
use crate::directory::StaticDirectory;
use crate::errors::CertAclError;
use crate::settings::Settings;
use crate::store::{ConfigStore, FileBackend};
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::Router;
use miette::IntoDiagnostic;
use std::net::SocketAddr;
use std::sync::Arc;

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    // ACL views must not end up in shared caches
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );

    response
}

/// Open the store at `settings.store.path`, seeding it from the bootstrap
/// policies if it holds no ACL configuration yet.
pub fn init_manager(settings: &Settings) -> Result<AuthorizationManager, CertAclError> {
    if let Some(dir) = settings.store.path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut store = ConfigStore::open(FileBackend::new(&settings.store.path))?;

    if settings.authz.bootstrap_dir.is_dir() {
        loader::seed_store(&mut store, &settings.authz.bootstrap_dir)?;
    } else {
        tracing::warn!(
            dir = %settings.authz.bootstrap_dir.display(),
            "Bootstrap policy directory not found, not seeding"
        );
    }

    let manager = AuthorizationManager::open(store)?.with_sync_commits(settings.store.sync);
    Ok(manager)
}

pub fn app(state: AppState) -> Router {
    crate::authz::web::router(state).layer(middleware::from_fn(security_headers))
}

pub async fn serve(settings: Settings) -> miette::Result<()> {
    let manager = Arc::new(init_manager(&settings)?);

    let audit = if settings.audit.enabled {
        let (audit, rx) = AuditLog::new();
        tokio::spawn(crate::audit::run_writer(rx, settings.audit.path.clone()));
        audit
    } else {
        AuditLog::disabled()
    };

    let directory = StaticDirectory::new(settings.directory.users.clone());
    if directory.is_empty() {
        tracing::warn!("No directory users configured, every API call will be rejected");
    }

    let state = AppState {
        service: AclAdminService::new(manager, audit)
            .with_admin_resource(settings.authz.admin_resource.clone()),
        directory: Arc::new(directory),
    };

    let addr: SocketAddr = settings
        .bind_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "ACL API listening");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .into_diagnostic()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
}
