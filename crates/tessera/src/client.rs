//! Client fingerprint from request headers.

use std::net::IpAddr;

use http::HeaderMap;
use http::header::USER_AGENT;
use tessera_session::ClientInfo;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Reads the client's IP and User-Agent.
///
/// Proxy headers are only honoured with `trust_forwarded`; without it the
/// IP is left empty, since a bare header map carries no peer address.
/// `X-Forwarded-For` wins over `X-Real-IP`, and only its first hop (the
/// original client) counts.
pub fn client_info(headers: &HeaderMap, trust_forwarded: bool) -> ClientInfo {
    let ip = if trust_forwarded {
        forwarded_for(headers).or_else(|| real_ip(headers))
    } else {
        None
    };
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    ClientInfo::new(ip, user_agent)
}

fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    let value = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    value.split(',').next()?.trim().parse().ok()
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers.get(X_REAL_IP)?.to_str().ok()?.trim().parse().ok()
}
