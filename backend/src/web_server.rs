use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use notes_common::{AccessToken, Credentials, NewNote, NoteDto, RefreshRequest, RegisteredUser, TokenPair};
use once_cell::sync::OnceCell;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use uuid::Uuid;

use crate::{auth, config::Settings, db::DbPool, notes, security};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub settings: Arc<Settings>,
    /// Hash checked when a login names an unknown user, so that the response
    /// takes as long as a wrong password would.
    pub dummy_password_hash: Arc<OnceCell<String>>,
}

impl AppState {
    pub fn new(db_pool: DbPool, settings: Settings) -> Self {
        Self {
            db_pool,
            settings: Arc::new(settings),
            dummy_password_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Hashed once per process at the configured cost.
    pub fn dummy_password_hash(&self) -> Result<&str, bcrypt::BcryptError> {
        self.dummy_password_hash
            .get_or_try_init(|| {
                bcrypt::hash(Uuid::new_v4().to_string(), self.settings.password_hash_cost)
            })
            .map(String::as_str)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register,
        auth::obtain_token,
        auth::refresh_token,
        notes::list_notes,
        notes::create_note,
        notes::delete_note,
    ),
    components(schemas(
        Credentials,
        RegisteredUser,
        TokenPair,
        RefreshRequest,
        AccessToken,
        NoteDto,
        NewNote,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn openapi_schema() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub async fn run_server(app_state: AppState) -> anyhow::Result<()> {
    let addr = app_state.settings.bind_addr;
    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Serving API at http://{}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received, draining connections");
}

/// Wires routes and middleware. Layers, outermost first: request id, trace,
/// security headers, CORS, host validation. Everything under `/api` except
/// registration and the token endpoints requires a bearer token.
pub fn create_router(app_state: AppState) -> Router {
    let settings = app_state.settings.clone();

    // Public routes
    let auth_routes = Router::new()
        .route("/user/register/", post(auth::register))
        .route("/token/", post(auth::obtain_token))
        .route("/token/refresh/", post(auth::refresh_token))
        .route("/schema/", get(openapi_schema));

    // Authenticated by default
    let note_routes = Router::new()
        .route("/notes/", get(notes::list_notes).post(notes::create_note))
        .route("/notes/delete/{id}/", delete(notes::delete_note))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::auth_middleware,
        ));

    let router = Router::new()
        .nest("/api", auth_routes.merge(note_routes))
        .nest_service("/static", ServeDir::new(&settings.static_dir))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            security::validate_host,
        ))
        .layer(security::cors_layer(&settings.cors))
        .with_state(app_state);

    security::with_security_headers(router)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
