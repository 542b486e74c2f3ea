//! Protocol-upgrade detection.
//!
//! A request is tunnelled only when `Connection` carries the `upgrade` token
//! and `Upgrade` carries `websocket`. Header values are token lists: every
//! line of a repeated header is split on commas, tokens are trimmed and
//! compared without regard to ASCII case.

use http::header::{AsHeaderName, CONNECTION, UPGRADE};
use http::HeaderMap;

/// Returns true if any value of `name` contains `token` as a list element.
pub fn header_contains_token<K>(headers: &HeaderMap, name: K, token: &str) -> bool
where
    K: AsHeaderName,
{
    headers.get_all(name).iter().any(|value| {
        value
            .as_bytes()
            .split(|b| *b == b',')
            .any(|item| item.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
    })
}

/// Returns true for a WebSocket upgrade request.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    header_contains_token(headers, CONNECTION, "upgrade")
        && header_contains_token(headers, UPGRADE, "websocket")
}
