use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::analysis::AnalysisClient;
use crate::auth::Accounts;
use crate::config::Config;
use crate::images::ImageHost;
use crate::store::{DynDocumentStore, SqliteDocumentStore, TimeoutStore};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub store: DynDocumentStore,
    pub accounts: Accounts,
    pub analysis: Arc<AnalysisClient>,
    pub images: Arc<ImageHost>,
}

impl AppState {
    /// Wire every collaborator from one pool and config.
    pub fn new(db: DbPool, config: Config) -> anyhow::Result<Self> {
        let sqlite = SqliteDocumentStore::new(db.clone())
            .with_max_attempts(config.store.max_transaction_attempts);
        let store: DynDocumentStore = Arc::new(TimeoutStore::new(sqlite, config.store.timeout()));

        Ok(Self {
            accounts: Accounts::new(db.clone(), &config.auth),
            analysis: Arc::new(AnalysisClient::new(&config.analysis)?),
            images: Arc::new(ImageHost::new(&config.images)?),
            store,
            db,
            config,
        })
    }
}
