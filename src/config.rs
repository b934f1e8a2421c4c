use serde::Deserialize;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 60 * 60 * 24 * 14;

/// Where accounts and sessions are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_seconds: i64,
    pub cookie_secure: bool,
}

impl SessionConfig {
    pub fn ttl(&self) -> time::Duration {
        time::Duration::seconds(self.ttl_seconds)
    }
}

/// Destinations resolved once at startup; handlers never read the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    pub login_url: String,
    pub after_login: String,
    pub after_logout: String,
    pub after_signup: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub session: SessionConfig,
    pub redirects: RedirectConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("STORE_BACKEND").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                anyhow::bail!("unknown STORE_BACKEND {other:?}, expected postgres|memory")
            }
        };

        let database_url = lookup("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set for the postgres backend");
        }

        let session = SessionConfig {
            ttl_seconds: lookup("SESSION_TTL_SECONDS")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
            cookie_secure: lookup("SESSION_COOKIE_SECURE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };

        let after_login = lookup("LOGIN_REDIRECT_URL").unwrap_or_else(|| "/".into());
        let redirects = RedirectConfig {
            login_url: lookup("LOGIN_URL").unwrap_or_else(|| "/login/".into()),
            after_logout: lookup("LOGOUT_REDIRECT_URL").unwrap_or_else(|| "/login/".into()),
            after_signup: lookup("SIGNUP_REDIRECT_URL").unwrap_or_else(|| after_login.clone()),
            after_login,
        };

        Ok(Self {
            backend,
            database_url,
            session,
            redirects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "memory")])).unwrap();
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.session.ttl_seconds, DEFAULT_SESSION_TTL_SECONDS);
        assert!(!cfg.session.cookie_secure);
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(format!("{err:#}").contains("DATABASE_URL"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("STORE_BACKEND", "redis")])).is_err());
    }

    #[test]
    fn signup_destination_follows_login_destination_by_default() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("LOGIN_REDIRECT_URL", "/home/"),
        ]))
        .unwrap();
        assert_eq!(cfg.redirects.after_login, "/home/");
        assert_eq!(cfg.redirects.after_signup, "/home/");
        assert_eq!(cfg.redirects.after_logout, "/login/");
        assert_eq!(cfg.redirects.login_url, "/login/");
    }

    #[test]
    fn explicit_signup_destination_wins() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("SIGNUP_REDIRECT_URL", "/welcome/"),
        ]))
        .unwrap();
        assert_eq!(cfg.redirects.after_login, "/");
        assert_eq!(cfg.redirects.after_signup, "/welcome/");
    }

    #[test]
    fn bad_session_ttl_falls_back_to_default() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("STORE_BACKEND", "memory"),
            ("SESSION_TTL_SECONDS", "soon"),
            ("SESSION_COOKIE_SECURE", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.session.ttl_seconds, DEFAULT_SESSION_TTL_SECONDS);
        assert!(cfg.session.cookie_secure);
    }
}
