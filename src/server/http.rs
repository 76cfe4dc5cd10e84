//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection, upgrades enabled
//! for the push socket.

use bytes::Bytes;
use hyper::body::Body;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ORIGIN,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::auth::{authenticate, JwtValidator};
use crate::config::Args;
use crate::gamification::LedgerService;
use crate::notifier::{ConnectionRegistry, DeadlineNotifier};
use crate::routes::response::{empty_body, read_body};
use crate::routes::{
    error_response, health_check, path_segments, points, socket, tasks, users, BoxBody, Route,
};
use crate::store::Store;
use crate::types::{PomodoroError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn Store>,
    pub jwt: JwtValidator,
    pub registry: Arc<ConnectionRegistry>,
    pub ledger: LedgerService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, store: Arc<dyn Store>) -> Result<Self> {
        let secret = args.jwt_secret().ok_or_else(|| {
            PomodoroError::Config("JWT_SECRET is required in production mode".into())
        })?;
        let jwt = JwtValidator::new(secret, args.jwt_expiry_seconds)?;
        let ledger = LedgerService::new(Arc::clone(&store));

        Ok(Self {
            args,
            store,
            jwt,
            registry: Arc::new(ConnectionRegistry::new()),
            ledger,
            started_at: Instant::now(),
        })
    }

    /// Deadline notifier sharing this state's store and registry
    pub fn notifier(&self) -> Arc<DeadlineNotifier> {
        Arc::new(DeadlineNotifier::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.args.notify_window_minutes,
            self.args.notifier_interval(),
        ))
    }
}

/// Bind the configured address and serve until Ctrl+C / SIGTERM
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Pomodoro server listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - do not use in production");
    }

    serve(state, listener, shutdown_signal()).await
}

/// Accept connections on `listener` until `shutdown` resolves
pub async fn serve(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move {
                                debug!("[{}] {} {}", addr, req.method(), req.uri().path());
                                Ok::<_, Infallible>(handle_request(state, req).await)
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .with_upgrades()
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutting down HTTP server");
                return Ok(());
            }
        }
    }
}

/// Route one request, applying the request timeout and CORS headers
pub async fn handle_request<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = if req.method() == Method::OPTIONS {
        preflight_response()
    } else {
        let limit = state.args.request_timeout();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match timeout(limit, dispatch(&state, req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => error_response(err),
            Err(_) => {
                warn!("{} {} timed out after {:?}", method, path, limit);
                error_response(PomodoroError::Timeout(state.args.request_timeout_ms))
            }
        }
    };

    apply_cors(&state.args, origin.as_deref(), response.headers_mut());
    response
}

async fn dispatch<B>(state: &Arc<AppState>, req: Request<B>) -> Result<Response<BoxBody>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let path = req.uri().path().to_string();
    let segments = path_segments(&path);
    let route = Route::resolve(req.method(), &segments).ok_or_else(|| {
        PomodoroError::NotFound(format!("Cannot {} {}", req.method(), path))
    })?;

    // Public routes
    match route {
        Route::Health => return Ok(health_check(state)),
        Route::Socket => return socket::upgrade(Arc::clone(state), req),
        Route::Signup => return users::signup(state, &read_body(req.into_body()).await?).await,
        Route::Login => return users::login(state, &read_body(req.into_body()).await?).await,
        _ => {}
    }

    let caller = authenticate(req.headers(), &state.jwt, state.store.as_ref()).await?;
    let body = read_body(req.into_body()).await?;

    match route {
        Route::Logout => Ok(users::logout(&caller)),
        Route::Leaderboard => users::leaderboard(state).await,
        Route::CreateTask => tasks::create(state, &caller, &body).await,
        Route::ListTasks => tasks::list(state, &caller).await,
        Route::GetTask(id) => tasks::get(state, &caller, id).await,
        Route::UpdateTask(id) => tasks::update(state, &caller, id, &body).await,
        Route::DeleteTask(id) => tasks::delete(state, &caller, id).await,
        Route::TaskProgress(id) => tasks::update_progress(state, &caller, id, &body).await,
        Route::CompleteTask(id) => tasks::complete(state, &caller, id).await,
        Route::TaskDeadline(id) => tasks::update_deadline(state, &caller, id, &body).await,
        Route::Points => points::get(state, &caller).await,
        Route::Health | Route::Socket | Route::Signup | Route::Login => Err(PomodoroError::Internal(
            "Public route reached the authenticated dispatcher".into(),
        )),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<BoxBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

fn apply_cors(args: &Args, origin: Option<&str>, headers: &mut HeaderMap) {
    if let Some(allowed) = args.allowed_origin(origin) {
        if let Ok(value) = HeaderValue::from_str(&allowed) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if allowed != "*" {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use clap::Parser;
    use http_body_util::Full;

    fn state() -> Arc<AppState> {
        let args = Args::try_parse_from([
            "pomodoro-server",
            "--jwt-secret",
            "http-test-secret-long-enough-0123456789",
            "--cors-origins",
            "http://localhost:5173",
        ])
        .unwrap();
        Arc::new(AppState::new(args, Arc::new(MemoryStore::new())).unwrap())
    }

    #[tokio::test]
    async fn test_preflight_has_cors_headers() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/tasks")
            .header(ORIGIN, "http://localhost:5173")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle_request(state(), req).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let req = Request::builder()
            .uri("/nowhere")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle_request(state(), req).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let req = Request::builder()
            .uri("/tasks")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle_request(state(), req).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_missing_secret_outside_dev_mode() {
        let args = Args::try_parse_from(["pomodoro-server"]).unwrap();
        let err = AppState::new(args, Arc::new(MemoryStore::new())).err().unwrap();
        assert!(matches!(err, PomodoroError::Config(_)));
    }
}
