use std::net::{IpAddr, SocketAddr};

/// Normalize a reporter supplied address to a bare IP.
///
/// Accepts `ip`, `ip:port`, `[ipv6]` and `[ipv6]:port`. Anything that does
/// not end up as a valid IP is discarded.
pub fn normalize_host_ip(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr.ip().to_string());
    }

    let host = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(raw);

    host.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// Name of the machine the hub runs on, used in alert details.
pub fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| String::from("unknown"))
}

const HUB_API_TOKEN: &str = "FLEETWATCH_API_TOKEN";

/// API token override from the environment (or `.env`).
pub fn get_api_token() -> Option<String> {
    std::env::var(HUB_API_TOKEN).ok().filter(|token| !token.is_empty())
}

const HUB_LOG_LEVEL: &str = "FLEETWATCH_LOG";

pub fn get_log_level() -> tracing::level_filters::LevelFilter {
    std::env::var(HUB_LOG_LEVEL)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(tracing::level_filters::LevelFilter::INFO)
}
