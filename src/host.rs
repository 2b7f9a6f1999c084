//! Host splitting into subdomain and registrable domain.

use std::net::IpAddr;

use crate::error::BuildError;

/// A host split around its registrable domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitHost {
    /// Labels left of the registrable domain; empty for an apex host.
    pub subdomain: String,
    /// Registrable domain according to the public suffix list.
    pub domain: String,
}

/// Splits `host` using the public suffix list.
///
/// `app.example.com` -> (`app`, `example.com`),
/// `a.b.example.co.uk` -> (`a.b`, `example.co.uk`),
/// `example.com` -> (``, `example.com`).
///
/// Wildcards, IP literals, ports and hosts that are themselves a public
/// suffix are rejected.
pub fn split_host(host: &str) -> Result<SplitHost, BuildError> {
    let normalized = host.trim().trim_end_matches('.').to_ascii_lowercase();

    if normalized.is_empty() {
        return Err(BuildError::invalid_host(host, "host is empty"));
    }
    if normalized.contains('*') {
        return Err(BuildError::invalid_host(
            host,
            "wildcard hosts are not supported",
        ));
    }

    let unbracketed = normalized
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(&normalized);
    if unbracketed.parse::<IpAddr>().is_ok() {
        return Err(BuildError::invalid_host(
            host,
            "IP addresses are not supported",
        ));
    }
    if normalized.contains(':') {
        return Err(BuildError::invalid_host(host, "host must not carry a port"));
    }

    let domain = psl::domain_str(&normalized)
        .ok_or_else(|| BuildError::invalid_host(host, "host has no registrable domain"))?;

    let subdomain = normalized
        .strip_suffix(domain)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or("");

    Ok(SplitHost {
        subdomain: subdomain.to_string(),
        domain: domain.to_string(),
    })
}
