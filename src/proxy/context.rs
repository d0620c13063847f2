use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request context carried through the dispatch phases.
pub struct RequestContext {
    pub method: String,
    /// Destination host the client asked for (case-folded, no port).
    pub host: String,
    pub client_ip: IpAddr,
    /// Chosen route: a redacted upstream URL, or "direct".
    pub upstream: String,
    pub start: Instant,
}

impl RequestContext {
    pub fn new(method: String, host: String, client_ip: IpAddr) -> Self {
        Self {
            method,
            host,
            client_ip,
            upstream: String::new(),
            start: Instant::now(),
        }
    }

    /// Build a JSON error response and record metrics in one place — the
    /// single exit point for all error paths.
    pub fn error_response(&self, status: StatusCode, msg: &str) -> hyper::Response<BoxBody> {
        self.log_access(status.as_u16());
        self.finalize_metrics(status.as_u16());

        hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(full_body(format!(r#"{{"error":"{}"}}"#, msg)))
            .unwrap()
    }

    /// Record final metrics for a finished request.
    pub fn finalize_metrics(&self, resp_status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(resp_status);

        metrics::counter!(
            "gateway_requests_total",
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
            "upstream" => self.upstream.clone(),
        )
        .increment(1);

        metrics::histogram!(
            "gateway_request_duration_seconds",
            "method" => self.method.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());
    }

    /// Structured access log — one line per request at info level.
    pub fn log_access(&self, status: u16) {
        tracing::info!(
            client_ip = %self.client_ip,
            method = %self.method,
            host = %self.host,
            status = status,
            upstream = %self.upstream,
            latency_ms = %self.start.elapsed().as_millis(),
            "access"
        );
    }
}
