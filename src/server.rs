//! HTTP request dispatch
//!
//! Every route authenticates the bearer token and authorizes the route's
//! operation before its body is accepted. Only then is a session job handed
//! to the orchestrator, so unauthorized or malformed requests never touch
//! the browser.

use crate::async_api::AsyncOrchestrator;
use crate::auth::{AuthorizationContext, Operation, PolicyAuthorizer, TokenAuthenticator};
use crate::request::{og_capture_spec, parse_capture, parse_render};
use crate::session::{SessionJob, SessionOrchestrator};
use crate::{CaptureSpec, Error, ImageFormat, Result, ScreenshotOptions};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use log::{error, info};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// JPEG quality for the legacy RPC-style capture route
pub const LEGACY_JPEG_QUALITY: u32 = 90;

/// Shared, read-only state handed to every request
#[derive(Clone)]
pub struct AppState {
    authenticator: TokenAuthenticator,
    authorizer: PolicyAuthorizer,
    sessions: AsyncOrchestrator,
}

impl AppState {
    pub fn new(
        authenticator: TokenAuthenticator,
        authorizer: PolicyAuthorizer,
        orchestrator: SessionOrchestrator,
    ) -> Self {
        Self {
            authenticator,
            authorizer,
            sessions: AsyncOrchestrator::new(orchestrator),
        }
    }

    /// Authenticate and authorize, then surface any validation error.
    ///
    /// The body is parsed before authorization only so a capture URL's host
    /// can be offered as a fact; a parse failure is reported after the
    /// authorization verdict so unauthorized callers always see 401.
    fn admit<T>(
        &self,
        headers: &HeaderMap,
        operation: Operation,
        parsed: Result<T>,
        host: impl Fn(&T) -> Option<String>,
    ) -> Result<(String, T)> {
        let header = headers
            .get(AUTHORIZATION)
            .map(|v| v.to_str())
            .transpose()
            .map_err(|_| Error::InvalidToken("authorization header is not ascii".into()))?;
        let token = self.authenticator.authenticate(header)?;

        let context =
            AuthorizationContext::new(operation).with_host(parsed.as_ref().ok().and_then(host));
        let identity = self.authorizer.authorize(&token, &context)?;

        Ok((identity, parsed?))
    }

    async fn capture(
        &self,
        headers: &HeaderMap,
        parsed: Result<CaptureSpec>,
        options: ScreenshotOptions,
    ) -> Result<Response> {
        let (identity, spec) =
            self.admit(headers, Operation::Capture, parsed, |spec: &CaptureSpec| spec.input.host())?;
        info!(
            "{} capture {:?} {}x{}",
            identity, spec.target, spec.viewport.width, spec.viewport.height
        );
        let image = self.sessions.run(SessionJob::capture(spec, options)).await?;
        Ok(image_response(options.format, image))
    }
}

/// Error wrapper that renders as an HTTP response without leaking internals.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match &self.0 {
            Error::MissingCredentials | Error::Unauthorized | Error::RouteNotFound(_) => {
                status.into_response()
            }
            Error::InvalidToken(_) => (status, "malformed or untrusted token").into_response(),
            Error::Validation(_) | Error::MissingPathSegment(_) => {
                (status, self.0.to_string()).into_response()
            }
            Error::ElementNotFound(_) => {
                error!("Request failed: {}", self.0);
                (status, "element not found").into_response()
            }
            _ => {
                error!("Request failed: {}", self.0);
                (status, "internal error").into_response()
            }
        }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/render", post(render))
        .route("/v1/capture", post(capture))
        .route("/og/*url", get(og))
        .route("/webshot.WebShot/Capture", post(webshot_capture))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}/", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Other(format!("server error: {}", e)))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn render(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let (identity, spec) = state.admit(&headers, Operation::Render, parse_render(&body), |_| None)?;
    info!(
        "{} render {}x{}@{}",
        identity, spec.viewport.width, spec.viewport.height, spec.viewport.scale
    );
    let image = state.sessions.run(SessionJob::from(spec)).await?;
    Ok(image_response(ImageFormat::Png, image))
}

async fn capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    Ok(state
        .capture(&headers, parse_capture(&body), ScreenshotOptions::png())
        .await?)
}

async fn og(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> std::result::Result<Response, ApiError> {
    let rest = uri.path().strip_prefix("/og").unwrap_or_default();
    Ok(state
        .capture(&headers, og_capture_spec(rest, uri.query()), ScreenshotOptions::png())
        .await?)
}

async fn webshot_capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let options = ScreenshotOptions::jpeg(LEGACY_JPEG_QUALITY);
    Ok(state.capture(&headers, parse_capture(&body), options).await?)
}

async fn fallback(uri: Uri) -> ApiError {
    match uri.path() {
        "/og" | "/og/" => ApiError(Error::MissingPathSegment("url")),
        path => ApiError(Error::RouteNotFound(path.to_string())),
    }
}

fn image_response(format: ImageFormat, image: Vec<u8>) -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, format.content_type())], image).into_response()
}
