//! Per-request identity: who is calling (for rate limiting) and which trace
//! the request belongs to.

use std::net::IpAddr;

use actix_web::HttpRequest;
use counter_domain::config::TrustedProxies;
use counter_domain::model::TraceContext;

const FORWARDED_FOR: &str = "x-forwarded-for";
const TRACEPARENT: &str = "traceparent";

/// Rate-limit key for the request. The first `X-Forwarded-For` hop is used
/// when the direct peer is a trusted proxy; otherwise the peer address.
pub fn client_identity(req: &HttpRequest, proxies: &TrustedProxies) -> String {
    let peer = req.peer_addr().map(|addr| addr.ip());
    let trusted = match &peer {
        Some(ip) => proxies.trusts(ip),
        None => matches!(proxies, TrustedProxies::All),
    };

    if trusted {
        if let Some(forwarded) = forwarded_client(req) {
            return forwarded;
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_client(req: &HttpRequest) -> Option<String> {
    let raw = req.headers().get(FORWARDED_FOR)?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }
    // Normalise when it parses; otherwise keep the opaque token.
    Some(
        first
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| first.to_string()),
    )
}

pub fn trace_context(req: &HttpRequest) -> TraceContext {
    req.headers()
        .get(TRACEPARENT)
        .and_then(|value| value.to_str().ok())
        .and_then(TraceContext::from_traceparent)
        .unwrap_or_else(TraceContext::generate)
}
