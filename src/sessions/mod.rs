//! Server-side sessions carried by the `sessionid` cookie.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use rand::{rngs::OsRng, Rng};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::SessionConfig;

pub mod extractors;
pub mod store;

pub use store::{MemorySessionStore, PgSessionStore, SessionStore};

pub const SESSION_COOKIE_NAME: &str = "sessionid";
pub const SESSION_KEY_LEN: usize = 40;
const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Opaque token proving an established session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let key = (0..SESSION_KEY_LEN)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect();
        Self(key)
    }

    /// Accepts only strings shaped like a generated key.
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == SESSION_KEY_LEN
            && raw.bytes().all(|b| KEY_ALPHABET.contains(&b));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRecord {
    #[sqlx(rename = "session_key")]
    pub key: SessionKey,
    pub account_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expire_at: OffsetDateTime,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expire_at <= now
    }
}

/// `Set-Cookie` value that hands the session key to the browser.
pub fn session_cookie(
    key: &SessionKey,
    config: &SessionConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={key}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.ttl_seconds
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_session_cookie(config: &SessionConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Finds a well-formed session key among the request cookies.
pub fn session_key_from_headers(headers: &HeaderMap) -> Option<SessionKey> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .and_then(|(_, value)| SessionKey::parse(value.trim()))
}
