use super::GatewayState;
use crate::error::GatewayError;
use crate::pool::admin as pool_admin;
use base64::Engine;
use bytes::Bytes;
use http::{header, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use serde::Deserialize;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}

#[derive(Deserialize)]
struct ProxyRequest {
    proxy: Option<String>,
}

pub async fn handle_admin(
    req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Open endpoints first.
    match (&method, path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            return Ok(json_response(StatusCode::OK, r#"{"status":"ok"}"#));
        }
        (&Method::GET, "/metrics") => {
            let body = state.metrics.render();
            return Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap());
        }
        _ => {}
    }

    // Everything below mutates or reveals the pool and requires credentials.
    if !authorized(req.headers(), &state) {
        return Ok(Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(
                header::WWW_AUTHENTICATE,
                "Basic realm=\"iris-gateway-admin\"",
            )
            .body(full_body(r#"{"error":"unauthorized"}"#))
            .unwrap());
    }

    match (method, path.as_str()) {
        (Method::POST, "/add_proxy") => {
            let Some(proxy) = read_proxy_field(req).await? else {
                return Ok(json_response(
                    StatusCode::BAD_REQUEST,
                    r#"{"error":"proxy url is required"}"#,
                ));
            };

            let probe_cfg = state.config.load().probe.clone();
            match pool_admin::add_proxy(&state.store, &probe_cfg, &proxy).await {
                Ok(entry) => Ok(json_response(
                    StatusCode::CREATED,
                    format!(
                        r#"{{"message":"proxy added successfully","id":{},"alive":{}}}"#,
                        entry.id, entry.alive
                    ),
                )),
                Err(e) => Ok(rejection(e)),
            }
        }

        (Method::DELETE, "/remove_proxy") => {
            let Some(proxy) = read_proxy_field(req).await? else {
                return Ok(json_response(
                    StatusCode::BAD_REQUEST,
                    r#"{"error":"proxy url is required"}"#,
                ));
            };

            match pool_admin::remove_proxy(&state.store, &proxy).await {
                Ok(()) => Ok(json_response(
                    StatusCode::OK,
                    r#"{"message":"proxy removed successfully"}"#,
                )),
                Err(e) => Ok(rejection(e)),
            }
        }

        (Method::GET, "/proxy_info") => match pool_admin::list_proxies(&state.store).await {
            Ok(entries) => {
                let body = serde_json::to_string_pretty(&entries).unwrap_or_default();
                Ok(json_response(StatusCode::OK, body))
            }
            Err(e) => Ok(rejection(e)),
        },

        _ => Ok(json_response(
            StatusCode::NOT_FOUND,
            r#"{"error":"not found"}"#,
        )),
    }
}

/// Parse `{"proxy": "..."}` out of the request body.
async fn read_proxy_field(req: Request<Incoming>) -> Result<Option<String>, hyper::Error> {
    let body = req.collect().await?.to_bytes();
    let parsed: Option<ProxyRequest> = serde_json::from_slice(&body).ok();
    Ok(parsed.and_then(|p| p.proxy).filter(|p| !p.is_empty()))
}

/// HTTP Basic auth against the configured admin credentials. Unset
/// credentials mean nobody is authorized.
fn authorized(headers: &http::HeaderMap, state: &GatewayState) -> bool {
    let config = state.config.load();
    let (Some(user), Some(pass)) = (&config.admin.username, &config.admin.password) else {
        return false;
    };

    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let mut parts = value.splitn(2, ' ');
    if !parts.next().unwrap_or("").eq_ignore_ascii_case("basic") {
        return false;
    }
    let payload = parts.next().unwrap_or("").trim();

    match base64::engine::general_purpose::STANDARD.decode(payload) {
        Ok(decoded) => decoded == format!("{}:{}", user, pass).as_bytes(),
        Err(_) => false,
    }
}

fn rejection(e: GatewayError) -> Response<BoxBody> {
    let status = match e {
        GatewayError::InvalidProxyUrl(_)
        | GatewayError::DuplicateProxy
        | GatewayError::ProxyUnreachable => StatusCode::BAD_REQUEST,
        GatewayError::ProxyNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_response(status, format!(r#"{{"error":"{}"}}"#, e))
}
