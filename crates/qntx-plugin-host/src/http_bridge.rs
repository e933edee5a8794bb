//! Mounts a plugin's HTTPBridge capability under `/api/{plugin}/*` by forwarding the
//! prefix-stripped request over gRPC `HandleHTTP` and replaying the response (§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

use crate::proto::HttpRequest as PluginHttpRequest;
use crate::supervisor::PluginHost;

/// `GET|POST|... /api/:plugin/*path` forwarded to the named plugin's bridge.
pub fn router(host: Arc<PluginHost>) -> Router {
    Router::new().route("/api/:plugin/*path", any(forward)).with_state(host)
}

async fn forward(
    State(host): State<Arc<PluginHost>>,
    Path((plugin, path)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    let request = PluginHttpRequest {
        method: method.as_str().to_string(),
        path: format!("/{path}"),
        headers: header_map,
        body: body.to_vec(),
    };

    match host.handle_http(&plugin, request).await {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status as u16).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = Response::builder().status(status);
            for (k, v) in resp.headers {
                if let (Ok(name), Ok(value)) = (HeaderName::try_from(k), HeaderValue::try_from(v)) {
                    builder = builder.header(name, value);
                }
            }
            builder.body(axum::body::Body::from(resp.body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => qntx_core_error_response(e),
    }
}

fn qntx_core_error_response(err: qntx_core::Error) -> Response {
    let status = match &err {
        qntx_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
        qntx_core::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        qntx_core::Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        qntx_core::Error::Forbidden(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string()).into_response()
}
