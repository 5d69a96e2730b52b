//! PostgreSQL-backed repositories

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{
    campaigns, contacts, dnc, trunks, CampaignRepository, ContactRepository, DncRepository,
    RepositoryError, TrunkRepository,
};
use crate::models::{Campaign, CampaignCounter, CampaignStatus, Contact, ContactStatus, Trunk};

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn found(rows: u64, entity: &'static str, id: i64) -> Result<(), RepositoryError> {
    if rows == 0 {
        Err(RepositoryError::NotFound { entity, id })
    } else {
        Ok(())
    }
}

#[async_trait]
impl CampaignRepository for PgRepository {
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, RepositoryError> {
        Ok(campaigns::get_by_id(&self.pool, id).await?)
    }

    async fn campaigns_with_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>, RepositoryError> {
        Ok(campaigns::get_by_status(&self.pool, status).await?)
    }

    async fn set_campaign_status(&self, id: i64, status: CampaignStatus) -> Result<(), RepositoryError> {
        found(campaigns::update_status(&self.pool, id, status).await?, "campaign", id)
    }

    async fn increment_counter(&self, id: i64, counter: CampaignCounter) -> Result<(), RepositoryError> {
        found(campaigns::increment_counter(&self.pool, id, counter).await?, "campaign", id)
    }
}

#[async_trait]
impl ContactRepository for PgRepository {
    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, RepositoryError> {
        Ok(contacts::get_by_id(&self.pool, id).await?)
    }

    async fn next_eligible(
        &self,
        campaign: &Campaign,
        exclude: &[i64],
        retry_before: DateTime<Utc>,
    ) -> Result<Option<Contact>, RepositoryError> {
        Ok(contacts::next_eligible(&self.pool, campaign.id, campaign.max_attempts(), exclude, retry_before).await?)
    }

    async fn count_remaining(&self, campaign: &Campaign) -> Result<i64, RepositoryError> {
        Ok(contacts::count_remaining(&self.pool, campaign.id, campaign.max_attempts()).await?)
    }

    async fn count_for_campaign(&self, campaign_id: i64) -> Result<i64, RepositoryError> {
        Ok(contacts::count_for_campaign(&self.pool, campaign_id).await?)
    }

    async fn import_from_pool(&self, campaign_id: i64) -> Result<u64, RepositoryError> {
        Ok(contacts::import_from_pool(&self.pool, campaign_id).await?)
    }

    async fn reset_dialing(&self, campaign_id: i64, keep: &[i64]) -> Result<u64, RepositoryError> {
        Ok(contacts::reset_dialing(&self.pool, campaign_id, keep).await?)
    }

    async fn mark_dialing(&self, contact_id: i64, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        found(contacts::mark_dialing(&self.pool, contact_id, at).await?, "contact", contact_id)
    }

    async fn set_result(
        &self,
        contact_id: i64,
        status: ContactStatus,
        call_log_id: Option<i64>,
    ) -> Result<(), RepositoryError> {
        found(
            contacts::set_result(&self.pool, contact_id, status, call_log_id).await?,
            "contact",
            contact_id,
        )
    }

    async fn is_dnc_exempt(&self, contact: &Contact) -> Result<bool, RepositoryError> {
        match contact.group_id {
            Some(group_id) => Ok(contacts::group_is_dnc_exempt(&self.pool, group_id).await?),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TrunkRepository for PgRepository {
    async fn get_trunk(&self, id: i64) -> Result<Option<Trunk>, RepositoryError> {
        Ok(trunks::get_by_id(&self.pool, id).await?)
    }

    async fn first_enabled(&self) -> Result<Option<Trunk>, RepositoryError> {
        Ok(trunks::first_enabled(&self.pool).await?)
    }
}

#[async_trait]
impl DncRepository for PgRepository {
    async fn add_dnc(&self, phone: &str, campaign_id: Option<i64>) -> Result<(), RepositoryError> {
        Ok(dnc::add(&self.pool, phone, campaign_id).await?)
    }

    async fn is_dnc(&self, phone: &str) -> Result<bool, RepositoryError> {
        Ok(dnc::contains(&self.pool, phone).await?)
    }
}
