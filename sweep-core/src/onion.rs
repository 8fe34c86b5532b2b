//! Onion address recognition
//!
//! Pulls a normalized `.onion` host out of whatever a listing puts in an
//! `href`: full URLs, scheme-less hosts, hosts with ports or paths.

use regex::Regex;
use std::sync::LazyLock;

/// A v2 (16 char) or v3 (56 char) onion host, optionally with subdomains
static ONION_HOST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9-]+\.)*(?:[a-z2-7]{56}|[a-z2-7]{16})\.onion$").unwrap()
});

/// Whether `host` is a well-formed onion host (already lowercased)
pub fn is_onion_host(host: &str) -> bool {
    ONION_HOST_REGEX.is_match(host)
}

/// Extract the normalized onion domain from a link target.
///
/// Returns `None` for anything that is not a well-formed onion address.
pub fn onion_domain(href: &str) -> Option<String> {
    let href = href.trim();

    let rest = match href.find("://") {
        Some(idx) => {
            let scheme = &href[..idx];
            if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
                return None;
            }
            &href[idx + 3..]
        }
        None => href.trim_start_matches('/'),
    };

    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();

    // Drop userinfo and port
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    is_onion_host(&host).then_some(host)
}
