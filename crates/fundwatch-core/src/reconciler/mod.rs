//! Campaign reconciliation
//!
//! Turns raw service snapshots into de-duplicated, causally ordered events
//! and keeps enough state in the [`StateStore`] to resume after a restart.
//!
//! A [`CampaignReconciler`] is owned by exactly one poll task. It never
//! retries on its own: the first error aborts the operation, whatever was
//! persisted before stays persisted, and the scheduler decides what happens
//! next from [`Error::retry_class`](crate::Error::retry_class).
//!
//! Events are emitted before the state that records them is saved. A failure
//! in between replays them; progress the store missed is saved by the next
//! tick even when it finds no new donations.

mod matches;
mod milestones;
mod state;

pub use state::CampaignState;

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::events::{CampaignEvent, DonationEvent, ResolvedRewardClaim};
use crate::model::{Donation, DonationMatch, Milestone};
use crate::state::{StatePaths, load_json, save_json};
use crate::traits::{EventSink, FundraisingService, StateStore};
use crate::{Error, Result};

use matches::{MatchUpdate, apply_match_update, expire_unreferenced_matches};
use milestones::{mark_newly_reached, merge_milestones};

/// Collaborators shared by every campaign's reconciler
#[derive(Clone)]
pub struct ReconcilerContext {
    pub service: Arc<dyn FundraisingService>,
    pub store: Arc<dyn StateStore>,
    pub sink: Arc<dyn EventSink>,
}

impl ReconcilerContext {
    pub fn new(
        service: Arc<dyn FundraisingService>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            service,
            store,
            sink,
        }
    }
}

/// Per-campaign tuning of the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Interval between poll ticks
    pub polling_interval: Duration,

    /// Explicit match polls happen every `polling_interval × multiplier`
    pub donation_matches_polling_multiplier: u32,

    /// Milestone reloads happen every `polling_interval × multiplier`
    pub milestones_polling_multiplier: u32,

    /// Keep at most this many processed donation ids (unbounded if `None`)
    pub max_tracked_donation_ids: Option<usize>,
}

impl ReconcilerSettings {
    /// Settings for a campaign polled every `polling_interval`
    pub fn from_poller_config(config: &PollerConfig, polling_interval: Duration) -> Self {
        Self {
            polling_interval,
            donation_matches_polling_multiplier: config.donation_matches_polling_multiplier,
            milestones_polling_multiplier: config.milestones_polling_multiplier,
            max_tracked_donation_ids: config.max_tracked_donation_ids,
        }
    }

    fn donation_matches_window(&self) -> TimeDelta {
        window(self.polling_interval, self.donation_matches_polling_multiplier)
    }

    fn milestones_window(&self) -> TimeDelta {
        window(self.polling_interval, self.milestones_polling_multiplier)
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_poller_config(&PollerConfig::default(), Duration::from_secs(15))
    }
}

fn window(interval: Duration, multiplier: u32) -> TimeDelta {
    TimeDelta::from_std(interval.saturating_mul(multiplier)).unwrap_or(TimeDelta::MAX)
}

/// Reconciles one campaign against the fundraising service
pub struct CampaignReconciler {
    ctx: ReconcilerContext,
    settings: ReconcilerSettings,
    paths: StatePaths,
    state: CampaignState,
    /// Donation ids or watermark changed since they were last saved
    unsaved_donations: bool,
    /// Match records or the match watermark changed since they were last saved
    unsaved_matches: bool,
}

impl CampaignReconciler {
    /// Load a campaign and its persisted state
    ///
    /// # Errors
    ///
    /// - `Error::CampaignLoad` when the campaign cannot be fetched or has no cause
    /// - `Error::CauseLoad` when the cause cannot be fetched
    /// - any service or state store error from the later steps
    pub async fn bootstrap(
        ctx: ReconcilerContext,
        campaign_id: &str,
        settings: ReconcilerSettings,
    ) -> Result<Self> {
        Self::bootstrap_at(ctx, campaign_id, settings, Utc::now()).await
    }

    /// [`bootstrap`](Self::bootstrap) with an explicit clock
    pub async fn bootstrap_at(
        ctx: ReconcilerContext,
        campaign_id: &str,
        settings: ReconcilerSettings,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let campaign = ctx
            .service
            .get_campaign(campaign_id)
            .await
            .map_err(|e| Error::campaign_load(format!("{}: {}", campaign_id, e)))?;

        let cause_id = campaign
            .cause_id()
            .ok_or_else(|| Error::campaign_load(format!("{}: campaign has no cause", campaign_id)))?
            .to_string();

        let cause = ctx
            .service
            .get_cause(&cause_id)
            .await
            .map_err(|e| Error::cause_load(format!("{}: {}", cause_id, e)))?;

        let mut reconciler = Self {
            paths: StatePaths::new(campaign_id),
            state: CampaignState::new(campaign, cause, now),
            ctx,
            settings,
            unsaved_donations: false,
            unsaved_matches: false,
        };

        reconciler.state.rewards = reconciler.ctx.service.get_rewards(campaign_id).await?;
        reconciler.bootstrap_milestones().await?;
        reconciler.bootstrap_donation_matches(now).await?;
        reconciler.bootstrap_donations(now).await?;

        info!(
            "Bootstrapped campaign {} ({}): {} rewards, {} milestones, {} donation matches, {} known donations",
            campaign_id,
            reconciler.state.campaign.name,
            reconciler.state.rewards.len(),
            reconciler.state.milestones.len(),
            reconciler.state.donation_matches.len(),
            reconciler.state.donation_ids.len()
        );

        Ok(reconciler)
    }

    async fn bootstrap_milestones(&mut self) -> Result<()> {
        let fetched = self.ctx.service.get_milestones(&self.state.campaign_id).await?;
        let saved: Vec<Milestone> =
            load_json(self.ctx.store.as_ref(), &self.paths.milestones()).await?.unwrap_or_default();

        self.state.milestones = merge_milestones(&saved, fetched);
        self.save_milestones().await
    }

    async fn bootstrap_donation_matches(&mut self, now: DateTime<Utc>) -> Result<()> {
        let store = self.ctx.store.as_ref();
        self.state.donation_matches =
            load_json(store, &self.paths.donation_matches()).await?.unwrap_or_default();
        self.state.last_donation_match_update =
            load_json::<Option<DateTime<Utc>>>(store, &self.paths.last_donation_match_update())
                .await?
                .flatten();

        self.sync_donation_matches(now).await
    }

    async fn bootstrap_donations(&mut self, now: DateTime<Utc>) -> Result<()> {
        let store = self.ctx.store.as_ref();
        let ids: Vec<String> = load_json(store, &self.paths.donation_ids()).await?.unwrap_or_default();
        self.state.restore_donation_ids(ids);

        let saved = load_json::<Option<DateTime<Utc>>>(store, &self.paths.last_donation_date()).await?;
        match saved.flatten() {
            Some(last) => self.state.last_donation_date = Some(last),
            None => {
                debug!(
                    "No donation watermark for campaign {}, starting from {}",
                    self.state.campaign_id, now
                );
                self.state.last_donation_date = Some(now);
                save_json(store, &self.paths.last_donation_date(), &now).await?;
            }
        }

        Ok(())
    }

    /// Run one poll tick with the current time
    pub async fn poll(&mut self) -> Result<()> {
        self.poll_at(Utc::now()).await
    }

    /// Run one poll tick
    ///
    /// Donations first, then the periodic match refresh, then milestones,
    /// so that milestone events see the totals of the donations just
    /// processed.
    pub async fn poll_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.reconcile_donations(now).await?;

        if now - self.state.last_donation_match_poll >= self.settings.donation_matches_window() {
            self.sync_donation_matches(now).await?;
        }

        self.refresh_milestones(now).await
    }

    /// Change the tick interval used for the low-frequency refresh windows
    pub fn set_polling_interval(&mut self, interval: Duration) {
        self.settings.polling_interval = interval;
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    async fn reconcile_donations(&mut self, now: DateTime<Utc>) -> Result<()> {
        let campaign_id = self.state.campaign_id.clone();
        let since = self
            .state
            .last_donation_date
            .map(|last| last + TimeDelta::milliseconds(1));

        let mut donations = self.ctx.service.get_donations(&campaign_id, since).await?;
        if donations.is_empty() {
            // Progress of a batch that failed halfway is saved here
            return self.save_pending().await;
        }

        self.state.campaign = self.ctx.service.get_campaign(&campaign_id).await?;
        donations.sort_by_key(|donation| donation.completed_at);

        let mut rewards_reloaded = false;
        let mut processed = 0usize;

        for donation in donations {
            if self.state.has_processed(&donation.id) {
                debug!("Skipping already processed donation {}", donation.id);
                self.state.advance_donation_watermark(donation.completed_at);
                self.unsaved_donations = true;
                continue;
            }

            let reward_claims = self.resolve_reward_claims(&donation, &mut rewards_reloaded).await?;

            let mut referenced = HashSet::new();
            let mut matched_by = Vec::new();
            for reference in &donation.donation_matches {
                if !referenced.insert(reference.id.clone()) {
                    continue;
                }
                let update = stamp_reference(
                    self.state.donation_matches.get(&reference.id),
                    reference,
                    donation.completed_at,
                );
                matched_by.push(update.matched_by.clone());
                self.apply_match(update, now).await?;
            }

            let expired = expire_unreferenced_matches(
                &campaign_id,
                &mut self.state.donation_matches,
                &donation,
                &referenced,
            );
            if !expired.is_empty() {
                info!(
                    "Inferred {} expired donation match(es) on campaign {}",
                    expired.len(),
                    campaign_id
                );
                self.unsaved_matches = true;
                self.emit_all(expired).await?;
            }

            let event = DonationEvent {
                campaign_id: campaign_id.clone(),
                campaign_name: self.state.campaign.name.clone(),
                donation_id: donation.id.clone(),
                donor_name: donation.donor_name.clone(),
                comment: donation.donor_comment.clone(),
                amount: donation.amount.clone(),
                completed_at: donation.completed_at,
                reward_claims,
                match_multiplier: (referenced.len() as u32).max(1),
                matched_by,
                campaign_amount_raised: self.state.campaign.amount_raised.clone(),
            };
            debug!(
                "Donation {} on campaign {}: {} {}",
                event.donation_id, campaign_id, event.amount.value, event.amount.currency
            );
            self.ctx.sink.emit(CampaignEvent::Donation(event)).await?;

            self.state.record_donation(&donation);
            self.unsaved_donations = true;
            processed += 1;
        }

        if let Some(max) = self.settings.max_tracked_donation_ids {
            let pruned = self.state.prune_donation_ids(max);
            if pruned > 0 {
                debug!("Pruned {} donation ids on campaign {}", pruned, campaign_id);
            }
        }

        self.save_pending().await?;

        if processed > 0 {
            info!("Processed {} new donation(s) on campaign {}", processed, campaign_id);
        }
        Ok(())
    }

    async fn resolve_reward_claims(
        &mut self,
        donation: &Donation,
        rewards_reloaded: &mut bool,
    ) -> Result<Vec<ResolvedRewardClaim>> {
        let mut resolved = Vec::with_capacity(donation.reward_claims.len());

        for claim in &donation.reward_claims {
            if self.state.reward_mut(&claim.reward_id).is_none() && !*rewards_reloaded {
                debug!("Unknown reward {}, reloading rewards", claim.reward_id);
                self.state.rewards = self.ctx.service.get_rewards(&self.state.campaign_id).await?;
                *rewards_reloaded = true;
            }

            let quantity = claim.quantity();
            let reward = self.state.reward_mut(&claim.reward_id).map(|reward| {
                if reward.is_limited() {
                    let remaining = reward.quantity_remaining.or(reward.quantity).unwrap_or(0);
                    reward.quantity_remaining = Some(remaining.saturating_sub(quantity));
                }
                reward.clone()
            });

            if reward.is_none() {
                warn!(
                    "Reward {} claimed on donation {} not found",
                    claim.reward_id, donation.id
                );
            }

            resolved.push(ResolvedRewardClaim {
                reward_id: claim.reward_id.clone(),
                quantity,
                reward,
            });
        }

        Ok(resolved)
    }

    /// Fetch match records newer than the watermark and apply them in order
    async fn sync_donation_matches(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut updates = self
            .ctx
            .service
            .get_donation_matches(&self.state.campaign_id, self.state.last_donation_match_update)
            .await?;
        updates.sort_by_key(|update| update.updated_at);

        for update in updates {
            self.apply_match(update, now).await?;
        }
        self.state.last_donation_match_poll = now;

        if self.unsaved_matches {
            self.save_donation_matches().await?;
        }
        Ok(())
    }

    /// Apply one match record and emit its events
    async fn apply_match(&mut self, update: DonationMatch, now: DateTime<Utc>) -> Result<()> {
        let outcome = apply_match_update(
            &self.state.campaign_id,
            &mut self.state.donation_matches,
            &mut self.state.last_donation_match_update,
            update,
            now,
        );
        if let MatchUpdate::Applied(events) = outcome {
            self.unsaved_matches = true;
            self.emit_all(events).await?;
        }
        Ok(())
    }

    async fn refresh_milestones(&mut self, now: DateTime<Utc>) -> Result<()> {
        let reached = mark_newly_reached(&mut self.state.milestones, &self.state.campaign);
        let newly_reached = !reached.is_empty();
        if newly_reached {
            info!(
                "{} milestone(s) reached on campaign {}",
                reached.len(),
                self.state.campaign_id
            );
            self.emit_all(reached).await?;
            self.save_milestones().await?;
        }

        if newly_reached || now - self.state.last_milestone_poll >= self.settings.milestones_window() {
            let fetched = self.ctx.service.get_milestones(&self.state.campaign_id).await?;
            self.state.milestones = merge_milestones(&self.state.milestones, fetched);
            self.state.last_milestone_poll = now;
            self.save_milestones().await?;
        }

        Ok(())
    }

    async fn emit_all(&self, events: Vec<CampaignEvent>) -> Result<()> {
        for event in events {
            self.ctx.sink.emit(event).await?;
        }
        Ok(())
    }

    async fn save_pending(&mut self) -> Result<()> {
        if self.unsaved_donations {
            self.save_donations().await?;
        }
        if self.unsaved_matches {
            self.save_donation_matches().await?;
        }
        Ok(())
    }

    async fn save_milestones(&self) -> Result<()> {
        save_json(self.ctx.store.as_ref(), &self.paths.milestones(), &self.state.milestones).await
    }

    async fn save_donations(&mut self) -> Result<()> {
        let store = self.ctx.store.as_ref();
        save_json(store, &self.paths.donation_ids(), &self.state.donation_ids).await?;
        save_json(store, &self.paths.last_donation_date(), &self.state.last_donation_date).await?;
        self.unsaved_donations = false;
        Ok(())
    }

    async fn save_donation_matches(&mut self) -> Result<()> {
        let store = self.ctx.store.as_ref();
        save_json(store, &self.paths.donation_matches(), &self.state.donation_matches).await?;
        save_json(
            store,
            &self.paths.last_donation_match_update(),
            &self.state.last_donation_match_update,
        )
        .await?;
        self.unsaved_matches = false;
        Ok(())
    }
}

/// Turn a match reference embedded in a donation into a full update
///
/// Embedded references carry a partial record and no trustworthy
/// `updated_at`, so the donation's completion time is used instead and the
/// missing fields are taken from the stored record.
fn stamp_reference(
    stored: Option<&DonationMatch>,
    reference: &DonationMatch,
    completed_at: DateTime<Utc>,
) -> DonationMatch {
    let mut update = reference.clone();
    update.updated_at = completed_at;

    if let Some(stored) = stored {
        let blank = DonationMatch::default();
        if update.matched_by.is_empty() {
            update.matched_by = stored.matched_by.clone();
        }
        if update.match_type.is_none() {
            update.match_type = stored.match_type.clone();
        }
        if update.pledged_amount == blank.pledged_amount {
            update.pledged_amount = stored.pledged_amount.clone();
        }
        if update.total_amount_raised == blank.total_amount_raised {
            update.total_amount_raised = stored.total_amount_raised.clone();
        }
        if update.started_at.is_none() {
            update.started_at = stored.started_at;
        }
        if update.ends_at == blank.ends_at {
            update.ends_at = stored.ends_at;
        }
        if update.inserted_at == blank.inserted_at {
            update.inserted_at = stored.inserted_at;
        }
        if update.completed_at.is_none() {
            update.completed_at = stored.completed_at;
        }
    } else if update.inserted_at == DonationMatch::default().inserted_at {
        update.inserted_at = completed_at;
    }

    update
}

impl std::fmt::Debug for CampaignReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignReconciler")
            .field("campaign_id", &self.state.campaign_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Money;
    use chrono::TimeZone;

    #[test]
    fn test_stamp_reference_fills_missing_fields_from_stored() {
        let stored = DonationMatch {
            id: "m1".into(),
            matched_by: "Matcher".into(),
            pledged_amount: Money::new("USD", 100.0),
            total_amount_raised: Money::new("USD", 10.0),
            active: true,
            ends_at: Utc.timestamp_opt(5_000, 0).unwrap(),
            inserted_at: Utc.timestamp_opt(10, 0).unwrap(),
            updated_at: Utc.timestamp_opt(20, 0).unwrap(),
            ..Default::default()
        };
        let reference = DonationMatch {
            id: "m1".into(),
            active: true,
            total_amount_raised: Money::new("USD", 15.0),
            ..Default::default()
        };
        let completed_at = Utc.timestamp_opt(30, 0).unwrap();

        let update = stamp_reference(Some(&stored), &reference, completed_at);

        assert_eq!(update.updated_at, completed_at);
        assert_eq!(update.matched_by, "Matcher");
        assert_eq!(update.pledged_amount.value, 100.0);
        assert_eq!(update.total_amount_raised.value, 15.0);
        assert_eq!(update.ends_at, stored.ends_at);
        assert_eq!(update.inserted_at, stored.inserted_at);
    }

    #[test]
    fn test_unknown_reference_is_inserted_at_donation_time() {
        let reference = DonationMatch {
            id: "m9".into(),
            active: true,
            ..Default::default()
        };
        let completed_at = Utc.timestamp_opt(30, 0).unwrap();

        let update = stamp_reference(None, &reference, completed_at);

        assert_eq!(update.inserted_at, completed_at);
        assert_eq!(update.updated_at, completed_at);
    }

    #[test]
    fn test_refresh_windows_scale_with_interval() {
        let mut settings = ReconcilerSettings::default();
        settings.polling_interval = Duration::from_secs(10);
        assert_eq!(settings.donation_matches_window(), TimeDelta::seconds(40));
        assert_eq!(settings.milestones_window(), TimeDelta::seconds(200));
    }
}
