//! Persistence layer
//!
//! The campaign engine only sees the repository traits below. Two stores
//! implement them: [`PgRepository`] on PostgreSQL via sqlx and
//! [`MemoryStore`] for running without a database.

pub mod campaigns;
pub mod contacts;
pub mod dnc;
pub mod memory;
pub mod postgres;
pub mod trunks;

pub use memory::MemoryStore;
pub use postgres::PgRepository;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

use crate::models::{Campaign, CampaignCounter, CampaignStatus, Contact, ContactStatus, Trunk};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, RepositoryError>;

    async fn campaigns_with_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>, RepositoryError>;

    async fn set_campaign_status(&self, id: i64, status: CampaignStatus) -> Result<(), RepositoryError>;

    async fn increment_counter(&self, id: i64, counter: CampaignCounter) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, RepositoryError>;

    /// Next contact to dial: `pending`, or a retryable result whose last
    /// attempt is at or before `retry_before`, with attempts left. Contacts
    /// in `exclude` and numbers put on the do-not-call ledger by another
    /// campaign are skipped. Oldest attempt first, never-dialed before all.
    async fn next_eligible(
        &self,
        campaign: &Campaign,
        exclude: &[i64],
        retry_before: DateTime<Utc>,
    ) -> Result<Option<Contact>, RepositoryError>;

    /// Contacts that may still be dialed now or after their cool-off.
    async fn count_remaining(&self, campaign: &Campaign) -> Result<i64, RepositoryError>;

    async fn count_for_campaign(&self, campaign_id: i64) -> Result<i64, RepositoryError>;

    /// Move pending contacts from the general pool into the campaign.
    async fn import_from_pool(&self, campaign_id: i64) -> Result<u64, RepositoryError>;

    /// Put `dialing` contacts back to `pending`, except those in `keep`.
    async fn reset_dialing(&self, campaign_id: i64, keep: &[i64]) -> Result<u64, RepositoryError>;

    /// Record a new attempt: `dialing`, attempts + 1, timestamp.
    async fn mark_dialing(&self, contact_id: i64, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn set_result(
        &self,
        contact_id: i64,
        status: ContactStatus,
        call_log_id: Option<i64>,
    ) -> Result<(), RepositoryError>;

    /// Whether the contact's group opts out of do-not-call recording.
    async fn is_dnc_exempt(&self, contact: &Contact) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TrunkRepository: Send + Sync {
    async fn get_trunk(&self, id: i64) -> Result<Option<Trunk>, RepositoryError>;

    async fn first_enabled(&self) -> Result<Option<Trunk>, RepositoryError>;
}

#[async_trait]
pub trait DncRepository: Send + Sync {
    /// Idempotent.
    async fn add_dnc(&self, phone: &str, campaign_id: Option<i64>) -> Result<(), RepositoryError>;

    async fn is_dnc(&self, phone: &str) -> Result<bool, RepositoryError>;
}

/// Handles to every repository, shared by the engine and the HTTP layer.
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub trunks: Arc<dyn TrunkRepository>,
    pub dnc: Arc<dyn DncRepository>,
}

impl Repositories {
    /// All four repositories backed by one store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CampaignRepository + ContactRepository + TrunkRepository + DncRepository + 'static,
    {
        Self {
            campaigns: store.clone(),
            contacts: store.clone(),
            trunks: store.clone(),
            dnc: store,
        }
    }
}

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
