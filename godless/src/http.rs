//! The HTTP face of the API.
//!
//! One endpoint: `POST /api/query/run`. The body is either query source text
//! or a binary-encoded [`Request`], selected by content type. Successful
//! responses are binary; errors are JSON with a status matching the error
//! kind.

use std::net::SocketAddr;

use anyhow::Context as _;
use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use godless_query::Query;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ApiError, Request};
use crate::scheduler::ApiHandle;

/// Content type for textual query bodies.
pub const QUERY_MIME: &str = "text/x-godless-query";
/// Content type for binary-encoded requests and responses.
pub const BINARY_MIME: &str = "application/x-godless-binary";

pub fn router(api: ApiHandle) -> Router {
    Router::new()
        .route("/api/query/run", post(run_query))
        .layer(Extension(api))
}

/// Bind the web service, returning the bound address and the serve future.
pub fn bind(
    addr: SocketAddr,
    api: ApiHandle,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, impl std::future::Future<Output = anyhow::Result<()>>)> {
    let app = router(api);
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("binding web service to {addr}"))?
        .serve(app.into_make_service());
    let local_addr = server.local_addr();
    info!(addr = %local_addr, "web service listening");

    let fut = async move {
        server
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("web service failed")
    };
    Ok((local_addr, fut))
}

/// Serve the API until the token cancels.
pub async fn serve(
    addr: SocketAddr,
    api: ApiHandle,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (_, fut) = bind(addr, api, cancel)?;
    fut.await
}

async fn run_query(
    Extension(api): Extension<ApiHandle>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let request = if content_type.starts_with(QUERY_MIME) {
        match parse_text_body(&body) {
            Ok(request) => request,
            Err(err) => return error_response(err),
        }
    } else if content_type.starts_with(BINARY_MIME) {
        match postcard::from_bytes::<Request>(&body) {
            Ok(request) => request,
            Err(err) => {
                return error_response(ApiError::Parse(format!("bad binary request: {err}")))
            }
        }
    } else {
        // Neither of our MIMEs: plain text, not JSON, on this path.
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("send {QUERY_MIME} or {BINARY_MIME}\n"),
        )
            .into_response();
    };

    debug!("dispatching http request");
    match api.send(request).await {
        Ok(response) => match postcard::to_allocvec(&response) {
            Ok(bytes) => (
                StatusCode::OK,
                [(CONTENT_TYPE, BINARY_MIME)],
                bytes,
            )
                .into_response(),
            Err(err) => error_response(ApiError::Internal(format!("encoding response: {err}"))),
        },
        Err(err) => error_response(err),
    }
}

fn parse_text_body(body: &[u8]) -> Result<Request, ApiError> {
    let text = std::str::from_utf8(body)
        .map_err(|err| ApiError::Parse(format!("query text is not utf-8: {err}")))?;
    let query = Query::parse(text)?;
    Ok(Request::Query(query))
}

fn status_of(err: &ApiError) -> StatusCode {
    match err {
        ApiError::Parse(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Conflict => StatusCode::CONFLICT,
        ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ApiError::Cancelled
        | ApiError::CosUnavailable(_)
        | ApiError::CorruptChunk(_)
        | ApiError::SignatureInvalid(_)
        | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Errors are always JSON, whatever the status.
fn error_response(err: ApiError) -> HttpResponse {
    let status = status_of(&err);
    let body = Json(serde_json::json!({ "error": err.to_string() }));
    (status, body).into_response()
}
