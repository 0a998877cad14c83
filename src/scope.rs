//! Scope checks for redirect and plugin-synthesized targets.
//!
//! Host-based scope requires an exact host match with the originating
//! request; domain-based scope additionally allows subdomains of the
//! originating request's registrable host.

use url::Url;

pub fn in_scope(origin_url: &str, target_url: &str, domain_based: bool) -> bool {
    let (Ok(origin), Ok(target)) = (Url::parse(origin_url), Url::parse(target_url)) else {
        return false;
    };
    let (Some(origin_host), Some(target_host)) = (origin.host_str(), target.host_str()) else {
        return false;
    };
    if origin_host.eq_ignore_ascii_case(target_host) {
        return true;
    }
    if domain_based {
        let origin_suffix = format!(".{}", strip_www(origin_host));
        return target_host.to_ascii_lowercase().ends_with(&origin_suffix.to_ascii_lowercase())
            || strip_www(target_host).eq_ignore_ascii_case(strip_www(origin_host));
    }
    false
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}
