//! Browser identifier extraction
//!
//! Derives the pixel's browser id (`_fbp`) and click id (`_fbc`) from the
//! request cookies, reconstructing `_fbc` from the `fbclid` URL parameter
//! when the pixel has not written the cookie yet.

use axum_extra::extract::cookie::Cookie;

pub const FBP_COOKIE: &str = "_fbp";
pub const FBC_COOKIE: &str = "_fbc";
pub const CLICK_ID_PARAM: &str = "fbclid";

/// `fb.<subdomain index>.<creation time>.<click id>`
const FBC_VERSION: &str = "fb";
const FBC_SUBDOMAIN_INDEX: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentifiers {
    pub fbp: Option<String>,
    pub fbc: Option<String>,
}

/// Extract `fbp`/`fbc` from a `Cookie` header and a page URL.
///
/// `now_secs` is the creation time written into a synthesized `fbc`.
pub fn extract_identifiers(
    cookie_header: Option<&str>,
    url: Option<&str>,
    now_secs: i64,
) -> ClientIdentifiers {
    let fbp = cookie_header.and_then(|h| cookie_value(h, FBP_COOKIE));
    let fbc = cookie_header
        .and_then(|h| cookie_value(h, FBC_COOKIE))
        .or_else(|| {
            url.and_then(|u| query_param(u, CLICK_ID_PARAM))
                .map(|click_id| synthesize_fbc(&click_id, now_secs))
        });

    ClientIdentifiers { fbp, fbc }
}

pub fn synthesize_fbc(click_id: &str, now_secs: i64) -> String {
    format!("{FBC_VERSION}.{FBC_SUBDOMAIN_INDEX}.{now_secs}.{click_id}")
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    Cookie::split_parse(header)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty())
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or_default();

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| urlencoding::decode(key).map(|k| k == name).unwrap_or(false))
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
