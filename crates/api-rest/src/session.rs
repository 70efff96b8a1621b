//! The session cookie and the authenticated-caller extractor.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use ckd_core::constants::{EXTENDED_TOKEN_LIFETIME_DAYS, SESSION_COOKIE_NAME, TOKEN_LIFETIME_DAYS};
use ckd_core::User;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Value of the session cookie, if the request carries one.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, token)| token)
}

/// `Set-Cookie` value carrying a freshly issued token.
pub fn session_cookie(token: &str, extended: bool) -> String {
    let days = if extended {
        EXTENDED_TOKEN_LIFETIME_DAYS
    } else {
        TOKEN_LIFETIME_DAYS
    };
    format!(
        "{SESSION_COOKIE_NAME}={token}; HttpOnly; Path=/; SameSite=Strict; Max-Age={}",
        days * SECONDS_PER_DAY
    )
}

/// `Set-Cookie` value that removes the session cookie.
pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE_NAME}=; HttpOnly; Path=/; SameSite=Strict; Max-Age=0")
}

/// The logged-in user behind the request. Rejects with 401 when there is none.
pub struct Caller(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = state.identity.require(session_token(&parts.headers))?;
        Ok(Caller(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn finds_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; jwt=abc.def"));
        assert_eq!(session_token(&headers), Some("abc.def"));
    }

    #[test]
    fn missing_cookie_is_none() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("jwtx=1"));
        assert_eq!(session_token(&headers), None);
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_lifetime_follows_remember_me() {
        assert!(session_cookie("t", false).ends_with("Max-Age=86400"));
        assert!(session_cookie("t", true).ends_with("Max-Age=604800"));
        assert!(expired_session_cookie().starts_with("jwt=;"));
    }
}
