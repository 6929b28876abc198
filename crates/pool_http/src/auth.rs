use http::{HeaderMap, Uri};

/// Constant-time bearer-token check against the configured `secret`.
///
/// Accepts either an `Authorization: Bearer <token>` header or a `?token=`
/// query parameter (the fallback the spec calls out for WebSocket upgrades,
/// which cannot set arbitrary headers during the handshake).
pub fn is_authorized(headers: &HeaderMap, uri: &Uri, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    if let Some(token) = bearer_token(headers) {
        if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            return true;
        }
    }

    if let Some(token) = query_token(uri) {
        if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            return true;
        }
    }

    false
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_secret_allows_everything() {
        let headers = HeaderMap::new();
        let uri: Uri = "/".parse().unwrap();
        assert!(is_authorized(&headers, &uri, ""));
    }

    #[test]
    fn rejects_wrong_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        let uri: Uri = "/".parse().unwrap();
        assert!(!is_authorized(&headers, &uri, "right"));
    }

    #[test]
    fn accepts_matching_query_token() {
        let headers = HeaderMap::new();
        let uri: Uri = "/all?token=right".parse().unwrap();
        assert!(is_authorized(&headers, &uri, "right"));
    }
}
