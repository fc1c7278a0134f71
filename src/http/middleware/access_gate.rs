//! Access gate middleware.
//! Enforces HTTP Basic credentials from the configured user table.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use subtle::{Choice, ConstantTimeEq};

use crate::config::AuthConfig;
use crate::observability::metrics;

/// Declarative credential check shared by every request.
#[derive(Debug, Clone)]
pub struct AccessGate {
    active: bool,
    users: Arc<BTreeMap<String, String>>,
    realm: Arc<str>,
}

impl AccessGate {
    pub fn new(active: bool, users: BTreeMap<String, String>, realm: &str) -> Self {
        Self {
            active,
            users: Arc::new(users),
            realm: Arc::from(realm),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.challenge, config.users.clone(), &config.realm)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether `username`/`password` match an entry of the user table.
    pub fn admits(&self, username: &str, password: &str) -> bool {
        credentials_match(&self.users, username, password)
    }

    fn challenge(&self) -> Response {
        let value = format!("Basic realm=\"{}\"", self.realm);
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, value)],
            "Unauthorized",
        )
            .into_response()
    }
}

/// Exact, case-sensitive match against every entry.
///
/// Every entry is compared so the time taken does not depend on which
/// entry (if any) matched.
pub fn credentials_match(users: &BTreeMap<String, String>, username: &str, password: &str) -> bool {
    let mut matched = Choice::from(0);
    for (user, pass) in users {
        let user_ok = user.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = pass.as_bytes().ct_eq(password.as_bytes());
        matched |= user_ok & pass_ok;
    }
    matched.into()
}

/// Decode an `Authorization: Basic …` value into `(username, password)`.
pub fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

pub async fn access_gate_middleware(
    State(gate): State<AccessGate>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !gate.is_active() {
        return next.run(req).await;
    }

    let credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic);

    match credentials {
        Some((user, pass)) if gate.admits(&user, &pass) => next.run(req).await,
        Some((user, _)) => {
            tracing::warn!(user = %user, path = %req.uri().path(), "Invalid credentials");
            metrics::record_auth_rejected();
            gate.challenge()
        }
        None => {
            tracing::debug!(path = %req.uri().path(), "Missing credentials");
            metrics::record_auth_rejected();
            gate.challenge()
        }
    }
}
