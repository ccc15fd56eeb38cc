use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::model::{Campaign, Cause, Donation, DonationMatch, Milestone, Reward};

/// Everything the poller knows about one campaign
///
/// Owned exclusively by the campaign's poll task; discarded when the poller
/// stops. Only the watermarks, donation ids, milestones and matches are
/// persisted.
#[derive(Debug, Clone)]
pub struct CampaignState {
    pub(crate) campaign_id: String,
    pub(crate) campaign: Campaign,
    pub(crate) cause: Cause,
    pub(crate) rewards: Vec<Reward>,
    pub(crate) milestones: Vec<Milestone>,
    pub(crate) donation_matches: BTreeMap<String, DonationMatch>,
    pub(crate) last_donation_date: Option<DateTime<Utc>>,
    pub(crate) donation_ids: Vec<String>,
    processed: HashSet<String>,
    pub(crate) last_donation_match_update: Option<DateTime<Utc>>,
    pub(crate) last_milestone_poll: DateTime<Utc>,
    pub(crate) last_donation_match_poll: DateTime<Utc>,
}

impl CampaignState {
    pub(crate) fn new(campaign: Campaign, cause: Cause, now: DateTime<Utc>) -> Self {
        Self {
            campaign_id: campaign.id.clone(),
            campaign,
            cause,
            rewards: Vec::new(),
            milestones: Vec::new(),
            donation_matches: BTreeMap::new(),
            last_donation_date: None,
            donation_ids: Vec::new(),
            processed: HashSet::new(),
            last_donation_match_update: None,
            last_milestone_poll: now,
            last_donation_match_poll: now,
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    pub fn rewards(&self) -> &[Reward] {
        &self.rewards
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn donation_matches(&self) -> &BTreeMap<String, DonationMatch> {
        &self.donation_matches
    }

    pub fn donation_ids(&self) -> &[String] {
        &self.donation_ids
    }

    pub fn last_donation_date(&self) -> Option<DateTime<Utc>> {
        self.last_donation_date
    }

    pub fn last_donation_match_update(&self) -> Option<DateTime<Utc>> {
        self.last_donation_match_update
    }

    /// Replace the processed ids, dropping duplicates while keeping order
    pub(crate) fn restore_donation_ids(&mut self, ids: Vec<String>) {
        self.processed.clear();
        self.donation_ids = ids
            .into_iter()
            .filter(|id| self.processed.insert(id.clone()))
            .collect();
    }

    pub(crate) fn has_processed(&self, donation_id: &str) -> bool {
        self.processed.contains(donation_id)
    }

    /// Record a donation as processed and advance the watermark
    ///
    /// Returns false when the id was already known.
    pub(crate) fn record_donation(&mut self, donation: &Donation) -> bool {
        self.advance_donation_watermark(donation.completed_at);
        if !self.processed.insert(donation.id.clone()) {
            return false;
        }
        self.donation_ids.push(donation.id.clone());
        true
    }

    /// Move the donation watermark forward, never backward
    pub(crate) fn advance_donation_watermark(&mut self, at: DateTime<Utc>) -> bool {
        match self.last_donation_date {
            Some(current) if current >= at => false,
            _ => {
                self.last_donation_date = Some(at);
                true
            }
        }
    }

    /// Drop the oldest ids beyond `max`
    ///
    /// Returns the number of ids removed.
    pub(crate) fn prune_donation_ids(&mut self, max: usize) -> usize {
        let excess = self.donation_ids.len().saturating_sub(max);
        for id in self.donation_ids.drain(..excess) {
            self.processed.remove(&id);
        }
        excess
    }

    pub(crate) fn reward_mut(&mut self, reward_id: &str) -> Option<&mut Reward> {
        self.rewards.iter_mut().find(|reward| reward.id == reward_id)
    }
}
