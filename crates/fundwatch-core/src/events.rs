//! Domain events emitted by the reconciler
//!
//! Every event carries the campaign id it belongs to. Events for one campaign
//! are emitted in causal order: match events produced while processing a
//! donation precede that donation's event.

use crate::model::{Money, Reward};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Donation,
    MilestoneReached,
    DonationMatchStarted,
    DonationMatchEnded,
}

impl EventKind {
    /// All event kinds
    pub const ALL: [EventKind; 4] = [
        EventKind::Donation,
        EventKind::MilestoneReached,
        EventKind::DonationMatchStarted,
        EventKind::DonationMatchEnded,
    ];

    /// Stable name used in logs and registries
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Donation => "donation",
            EventKind::MilestoneReached => "milestone-reached",
            EventKind::DonationMatchStarted => "donation-match-started",
            EventKind::DonationMatchEnded => "donation-match-ended",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reward claim after lookup against the campaign's rewards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRewardClaim {
    pub reward_id: String,
    pub quantity: u32,
    /// `None` when the reward could not be found even after a reload
    pub reward: Option<Reward>,
}

/// A new donation was processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationEvent {
    pub campaign_id: String,
    pub campaign_name: String,
    pub donation_id: String,
    pub donor_name: String,
    pub comment: Option<String>,
    pub amount: Money,
    pub completed_at: DateTime<Utc>,
    pub reward_claims: Vec<ResolvedRewardClaim>,
    /// Display names of the active matches touching this donation
    pub matched_by: Vec<String>,
    /// Distinct matches touching this donation, at least 1
    pub match_multiplier: u32,
    /// Campaign total after this donation batch
    pub campaign_amount_raised: Money,
}

/// A milestone total was crossed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneReachedEvent {
    pub campaign_id: String,
    pub campaign_name: String,
    pub milestone_id: String,
    pub name: String,
    pub amount: Money,
    pub campaign_amount_raised: Money,
}

/// A donation match became active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationMatchStartedEvent {
    pub campaign_id: String,
    pub match_id: String,
    pub matched_by: String,
    pub pledged_amount: Money,
    /// Amount matched so far
    pub amount_matched: Money,
    /// End of the match, epoch seconds
    pub ends_at: i64,
    /// Seconds until `ends_at`, 0 once the match is inactive
    pub time_remaining_secs: i64,
}

/// A donation match finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationMatchEndedEvent {
    pub campaign_id: String,
    pub match_id: String,
    pub matched_by: String,
    pub match_type: Option<String>,
    pub pledged_amount: Money,
    pub amount_matched: Money,
    /// Ended because the pledge was matched in full
    pub has_completed: bool,
    /// Ended because the deadline passed first
    pub has_expired: bool,
}

/// Event emitted to the [`EventSink`](crate::traits::EventSink)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CampaignEvent {
    Donation(DonationEvent),
    MilestoneReached(MilestoneReachedEvent),
    DonationMatchStarted(DonationMatchStartedEvent),
    DonationMatchEnded(DonationMatchEndedEvent),
}

impl CampaignEvent {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            CampaignEvent::Donation(_) => EventKind::Donation,
            CampaignEvent::MilestoneReached(_) => EventKind::MilestoneReached,
            CampaignEvent::DonationMatchStarted(_) => EventKind::DonationMatchStarted,
            CampaignEvent::DonationMatchEnded(_) => EventKind::DonationMatchEnded,
        }
    }

    /// Campaign the event belongs to
    pub fn campaign_id(&self) -> &str {
        match self {
            CampaignEvent::Donation(e) => &e.campaign_id,
            CampaignEvent::MilestoneReached(e) => &e.campaign_id,
            CampaignEvent::DonationMatchStarted(e) => &e.campaign_id,
            CampaignEvent::DonationMatchEnded(e) => &e.campaign_id,
        }
    }
}
