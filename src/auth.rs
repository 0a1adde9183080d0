use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};

use crate::{
    AppState, accounts,
    entities::user,
    error::{AppError, AppResult},
};

pub const SESSION_COOKIE: &str = "whatsplaying_session";
pub const FLASH_COOKIE: &str = "whatsplaying_flash";

/// The logged-in user. Anonymous requests are redirected to the login page.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub user::Model);

/// The logged-in user, if any.
#[derive(Clone, Debug)]
pub struct MaybeUser(pub Option<user::Model>);

impl MaybeUser {
    pub fn username(&self) -> Option<&str> {
        self.0.as_ref().map(|u| u.username.as_str())
    }
}

async fn resolve(parts: &Parts, state: &Arc<AppState>) -> AppResult<Option<user::Model>> {
    let jar = CookieJar::from_headers(&parts.headers);
    match jar.get(SESSION_COOKIE) {
        Some(cookie) => accounts::session_user(&state.db, cookie.value()).await,
        None => Ok(None),
    }
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await?.map(CurrentUser).ok_or(AppError::Unauthorized)
    }
}

impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve(parts, state).await?))
    }
}

pub fn session_cookie(token: String, ttl_days: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(ttl_days.max(1)))
        .build()
}

pub fn clear_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

/// Queues a one-shot message for the next rendered page.
pub fn set_flash(jar: CookieJar, message: &str) -> CookieJar {
    jar.add(
        Cookie::build((FLASH_COOKIE, urlencoding::encode(message).into_owned()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build(),
    )
}

/// Reads and clears the pending flash message.
pub fn take_flash(jar: CookieJar) -> (CookieJar, Option<String>) {
    let message = jar
        .get(FLASH_COOKIE)
        .and_then(|c| urlencoding::decode(c.value()).ok().map(|m| m.into_owned()))
        .filter(|m| !m.is_empty());
    match message {
        Some(message) => (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), Some(message)),
        None => (jar, None),
    }
}

/// Keeps post-login redirects on this site. Browsers read `\` as `/`, so
/// `/\host` is as protocol-relative as `//host`.
pub fn safe_next(next: Option<&str>) -> &str {
    let Some(path) = next else { return "/" };
    let mut chars = path.chars();
    let local = chars.next() == Some('/')
        && !matches!(chars.next(), Some('/' | '\\'))
        && !path.chars().any(char::is_control);
    if local { path } else { "/" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_round_trip_clears_cookie() {
        let jar = set_flash(CookieJar::new(), "Dune added; enjoy!");
        let (jar, message) = take_flash(jar);
        assert_eq!(message.as_deref(), Some("Dune added; enjoy!"));
        assert!(jar.get(FLASH_COOKIE).is_none());
        assert_eq!(take_flash(jar).1, None);
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = session_cookie("abc".to_string(), 14, true);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(14)));
    }

    #[test]
    fn next_paths_stay_local() {
        assert_eq!(safe_next(Some("/watchlist")), "/watchlist");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("https://evil.example")), "/");
        assert_eq!(safe_next(Some("/\\evil.example")), "/");
        assert_eq!(safe_next(Some("/\t/evil.example")), "/");
        assert_eq!(safe_next(Some("/search?q=a\\b")), "/search?q=a\\b");
        assert_eq!(safe_next(Some("/")), "/");
        assert_eq!(safe_next(None), "/");
    }
}
