use std::sync::Arc;

use tera::Tera;
use tracing::{info, warn};

use crate::accounts::repo::{AccountStore, MemoryAccountStore, PgAccountStore};
use crate::config::{AppConfig, StoreBackend};
use crate::db;
use crate::sessions::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::templates;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub accounts: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub templates: Arc<Tera>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let templates = Arc::new(templates::load()?);

        let (accounts, sessions): (Arc<dyn AccountStore>, Arc<dyn SessionStore>) =
            match config.backend {
                StoreBackend::Postgres => {
                    let url = config.database_url.as_deref().unwrap_or_default();
                    let pool = db::connect(url).await?;
                    db::migrate(&pool).await;
                    info!("using postgres stores");
                    (
                        Arc::new(PgAccountStore::new(pool.clone())),
                        Arc::new(PgSessionStore::new(pool)),
                    )
                }
                StoreBackend::Memory => {
                    warn!("using in-memory stores; accounts and sessions vanish on restart");
                    (
                        Arc::new(MemoryAccountStore::new()),
                        Arc::new(MemorySessionStore::new()),
                    )
                }
            };

        Ok(Self::from_parts(config, accounts, sessions, templates))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        templates: Arc<Tera>,
    ) -> Self {
        Self {
            config,
            accounts,
            sessions,
            templates,
        }
    }

    /// In-memory state with default settings, for tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with_accounts(Arc::new(MemoryAccountStore::new()))
    }

    #[cfg(test)]
    pub fn fake_with_accounts(accounts: Arc<dyn AccountStore>) -> Self {
        use crate::config::{RedirectConfig, SessionConfig, DEFAULT_SESSION_TTL_SECONDS};

        let config = Arc::new(AppConfig {
            backend: StoreBackend::Memory,
            database_url: None,
            session: SessionConfig {
                ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
                cookie_secure: false,
            },
            redirects: RedirectConfig {
                login_url: "/login/".into(),
                after_login: "/".into(),
                after_logout: "/login/".into(),
                after_signup: "/".into(),
            },
        });
        let templates = Arc::new(templates::load().expect("embedded templates parse"));
        Self::from_parts(config, accounts, Arc::new(MemorySessionStore::new()), templates)
    }
}
