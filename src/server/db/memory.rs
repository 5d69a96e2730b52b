//! In-memory store
//!
//! Same semantics as the PostgreSQL queries. Used when no `DATABASE_URL`
//! is configured and as the store behind the engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    CampaignRepository, ContactRepository, DncRepository, RepositoryError, TrunkRepository,
};
use crate::models::{Campaign, CampaignCounter, CampaignStatus, Contact, ContactStatus, Trunk};

#[derive(Default)]
struct Tables {
    campaigns: BTreeMap<i64, Campaign>,
    contacts: BTreeMap<i64, Contact>,
    trunks: BTreeMap<i64, Trunk>,
    /// group id -> dnc_exempt
    groups: HashMap<i64, bool>,
    dnc: HashSet<(String, Option<i64>)>,
}

impl Tables {
    /// Blocked for `campaign_id` by an entry some other campaign (or an
    /// operator) recorded.
    fn blocked(&self, phone: &str, campaign_id: Option<i64>) -> bool {
        self.dnc
            .iter()
            .any(|(number, owner)| number == phone && *owner != campaign_id)
    }

    fn dialable(&self, contact: &Contact, campaign: &Campaign) -> bool {
        contact.campaign_id == Some(campaign.id)
            && contact.attempts < campaign.max_attempts()
            && !self.blocked(&contact.phone, contact.campaign_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        self.tables.write().await.campaigns.insert(campaign.id, campaign);
    }

    pub async fn insert_contact(&self, contact: Contact) {
        self.tables.write().await.contacts.insert(contact.id, contact);
    }

    pub async fn insert_trunk(&self, trunk: Trunk) {
        self.tables.write().await.trunks.insert(trunk.id, trunk);
    }

    pub async fn insert_group(&self, id: i64, dnc_exempt: bool) {
        self.tables.write().await.groups.insert(id, dnc_exempt);
    }

    pub async fn contacts_in(&self, campaign_id: i64) -> Vec<Contact> {
        self.tables
            .read()
            .await
            .contacts
            .values()
            .filter(|c| c.campaign_id == Some(campaign_id))
            .cloned()
            .collect()
    }

    pub async fn dnc_entries(&self) -> Vec<(String, Option<i64>)> {
        let mut entries: Vec<_> = self.tables.read().await.dnc.iter().cloned().collect();
        entries.sort();
        entries
    }

    /// Shift a contact's last attempt into the past.
    #[cfg(test)]
    pub async fn backdate_attempt(&self, contact_id: i64, by: chrono::Duration) {
        if let Some(contact) = self.tables.write().await.contacts.get_mut(&contact_id) {
            contact.last_attempt_at = contact.last_attempt_at.map(|t| t - by);
        }
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, RepositoryError> {
        Ok(self.tables.read().await.campaigns.get(&id).cloned())
    }

    async fn campaigns_with_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn set_campaign_status(&self, id: i64, status: CampaignStatus) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let campaign = tables
            .campaigns
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { entity: "campaign", id })?;
        campaign.status = status;
        campaign.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn increment_counter(&self, id: i64, counter: CampaignCounter) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let campaign = tables
            .campaigns
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { entity: "campaign", id })?;
        *campaign.counter_mut(counter) += 1;
        Ok(())
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn get_contact(&self, id: i64) -> Result<Option<Contact>, RepositoryError> {
        Ok(self.tables.read().await.contacts.get(&id).cloned())
    }

    async fn next_eligible(
        &self,
        campaign: &Campaign,
        exclude: &[i64],
        retry_before: DateTime<Utc>,
    ) -> Result<Option<Contact>, RepositoryError> {
        let tables = self.tables.read().await;
        let next = tables
            .contacts
            .values()
            .filter(|c| tables.dialable(c, campaign) && !exclude.contains(&c.id))
            .filter(|c| match c.status {
                ContactStatus::Pending => true,
                s if s.is_retryable() => c.last_attempt_at.map_or(true, |t| t <= retry_before),
                _ => false,
            })
            // None sorts first, like NULLS FIRST
            .min_by_key(|c| (c.last_attempt_at, c.id))
            .cloned();
        Ok(next)
    }

    async fn count_remaining(&self, campaign: &Campaign) -> Result<i64, RepositoryError> {
        let tables = self.tables.read().await;
        let count = tables
            .contacts
            .values()
            .filter(|c| tables.dialable(c, campaign))
            .filter(|c| c.status == ContactStatus::Pending || c.status.is_retryable())
            .count();
        Ok(count as i64)
    }

    async fn count_for_campaign(&self, campaign_id: i64) -> Result<i64, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .contacts
            .values()
            .filter(|c| c.campaign_id == Some(campaign_id))
            .count() as i64)
    }

    async fn import_from_pool(&self, campaign_id: i64) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let mut moved = 0;
        for contact in tables.contacts.values_mut() {
            if contact.campaign_id.is_none() && contact.status == ContactStatus::Pending {
                contact.campaign_id = Some(campaign_id);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn reset_dialing(&self, campaign_id: i64, keep: &[i64]) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let mut reset = 0;
        for contact in tables.contacts.values_mut() {
            if contact.campaign_id == Some(campaign_id)
                && contact.status == ContactStatus::Dialing
                && !keep.contains(&contact.id)
            {
                contact.status = ContactStatus::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn mark_dialing(&self, contact_id: i64, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let contact = tables
            .contacts
            .get_mut(&contact_id)
            .ok_or(RepositoryError::NotFound { entity: "contact", id: contact_id })?;
        contact.status = ContactStatus::Dialing;
        contact.attempts += 1;
        contact.last_attempt_at = Some(at);
        Ok(())
    }

    async fn set_result(
        &self,
        contact_id: i64,
        status: ContactStatus,
        call_log_id: Option<i64>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let contact = tables
            .contacts
            .get_mut(&contact_id)
            .ok_or(RepositoryError::NotFound { entity: "contact", id: contact_id })?;
        contact.status = status;
        if call_log_id.is_some() {
            contact.call_log_id = call_log_id;
        }
        Ok(())
    }

    async fn is_dnc_exempt(&self, contact: &Contact) -> Result<bool, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(contact
            .group_id
            .and_then(|id| tables.groups.get(&id).copied())
            .unwrap_or(false))
    }
}

#[async_trait]
impl TrunkRepository for MemoryStore {
    async fn get_trunk(&self, id: i64) -> Result<Option<Trunk>, RepositoryError> {
        Ok(self.tables.read().await.trunks.get(&id).cloned())
    }

    async fn first_enabled(&self) -> Result<Option<Trunk>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .trunks
            .values()
            .find(|t| t.enabled)
            .cloned())
    }
}

#[async_trait]
impl DncRepository for MemoryStore {
    async fn add_dnc(&self, phone: &str, campaign_id: Option<i64>) -> Result<(), RepositoryError> {
        self.tables
            .write()
            .await
            .dnc
            .insert((phone.to_string(), campaign_id));
        Ok(())
    }

    async fn is_dnc(&self, phone: &str) -> Result<bool, RepositoryError> {
        Ok(self.tables.read().await.dnc.iter().any(|(number, _)| number == phone))
    }
}
