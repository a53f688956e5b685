//! Auth routes. Identity lives in an external backend; only the token
//! plumbing is handled here.

use axum::{
    extract::Extension,
    http::{header, HeaderMap},
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::pipeline::stages::Cookies;

pub const TOKEN_COOKIE: &str = "token";

pub fn router() -> Router {
    Router::new()
        .route("/me", get(me))
        .route("/logout", get(logout))
}

/// Bearer header first, then the token cookie. `none` is a cleared cookie.
pub fn bearer_token(headers: &HeaderMap, cookies: Option<&Cookies>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let from_cookie = cookies.and_then(|c| c.get(TOKEN_COOKIE));

    from_header
        .or(from_cookie)
        .filter(|t| !t.is_empty() && *t != "none")
        .map(String::from)
}

async fn me(headers: HeaderMap, cookies: Option<Extension<Cookies>>) -> Result<Json<Value>> {
    let cookies = cookies.map(|Extension(c)| c);
    if bearer_token(&headers, cookies.as_ref()).is_none() {
        return Err(Error::Unauthorized);
    }
    Err(Error::upstream("auth", "no identity backend is configured"))
}

async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    let cleared = Cookie::build((TOKEN_COOKIE, "none"))
        .path("/")
        .http_only(true);
    (
        jar.add(cleared),
        Json(json!({ "success": true, "data": {} })),
    )
}
