//! Donation match lifecycle
//!
//! The API never announces that a match started or ended; both are derived by
//! comparing each incoming match record with the stored one. Records can
//! arrive out of order or twice (from the match endpoint and embedded in
//! donations), so only strictly newer records are applied.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::events::{CampaignEvent, DonationMatchEndedEvent, DonationMatchStartedEvent};
use crate::model::{Donation, DonationMatch};

/// Result of applying one match record
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchUpdate {
    /// Not newer than the stored record; nothing changed
    Ignored,
    /// Stored record replaced; events to emit in order
    Applied(Vec<CampaignEvent>),
}

/// Apply one match record to the campaign's match book
///
/// - unknown id, active: started
/// - unknown id, inactive with `completed_at`: started then ended
/// - known id, older or equal `updated_at`: ignored
/// - known id, `active` true→false: ended; false→true: started
///
/// Every applied record replaces the stored one and advances `watermark`.
pub(crate) fn apply_match_update(
    campaign_id: &str,
    matches: &mut BTreeMap<String, DonationMatch>,
    watermark: &mut Option<DateTime<Utc>>,
    update: DonationMatch,
    now: DateTime<Utc>,
) -> MatchUpdate {
    let mut events = Vec::new();

    match matches.get(&update.id) {
        None => {
            if update.active {
                events.push(started_event(campaign_id, &update, now));
            } else if update.completed_at.is_some() {
                events.push(started_event(campaign_id, &update, now));
                events.push(ended_event(campaign_id, &update));
            }
        }
        Some(stored) => {
            if update.updated_at <= stored.updated_at {
                return MatchUpdate::Ignored;
            }
            match (stored.active, update.active) {
                (true, false) => events.push(ended_event(campaign_id, &update)),
                (false, true) => events.push(started_event(campaign_id, &update, now)),
                _ => {}
            }
        }
    }

    if watermark.is_none_or(|current| current < update.updated_at) {
        *watermark = Some(update.updated_at);
    }
    matches.insert(update.id.clone(), update);

    MatchUpdate::Applied(events)
}

/// Expire active matches a donation was not matched by
///
/// While a match is active every donation is matched by it, so an active
/// match that existed before `donation` completed but is absent from its
/// references has ended in the meantime. The end is stamped at `ends_at`.
///
/// Payout semantics for `all` matches ended this way are unresolved; the
/// ended event reports the last observed matched amount and the match type
/// so consumers can tell.
pub(crate) fn expire_unreferenced_matches(
    campaign_id: &str,
    matches: &mut BTreeMap<String, DonationMatch>,
    donation: &Donation,
    referenced: &HashSet<String>,
) -> Vec<CampaignEvent> {
    matches
        .values_mut()
        .filter(|m| m.active && !referenced.contains(&m.id) && m.inserted_at < donation.completed_at)
        .map(|m| {
            m.active = false;
            m.completed_at = Some(m.ends_at);
            m.updated_at = m.ends_at;
            ended_event(campaign_id, m)
        })
        .collect()
}

pub(crate) fn started_event(
    campaign_id: &str,
    donation_match: &DonationMatch,
    now: DateTime<Utc>,
) -> CampaignEvent {
    let time_remaining_secs = if donation_match.active {
        (donation_match.ends_at - now).num_seconds().max(0)
    } else {
        0
    };

    CampaignEvent::DonationMatchStarted(DonationMatchStartedEvent {
        campaign_id: campaign_id.to_string(),
        match_id: donation_match.id.clone(),
        matched_by: donation_match.matched_by.clone(),
        pledged_amount: donation_match.pledged_amount.clone(),
        amount_matched: donation_match.total_amount_raised.clone(),
        ends_at: donation_match.ends_at.timestamp(),
        time_remaining_secs,
    })
}

pub(crate) fn ended_event(campaign_id: &str, donation_match: &DonationMatch) -> CampaignEvent {
    let has_completed = donation_match.is_fully_matched();

    CampaignEvent::DonationMatchEnded(DonationMatchEndedEvent {
        campaign_id: campaign_id.to_string(),
        match_id: donation_match.id.clone(),
        matched_by: donation_match.matched_by.clone(),
        match_type: donation_match.match_type.clone(),
        pledged_amount: donation_match.pledged_amount.clone(),
        amount_matched: donation_match.total_amount_raised.clone(),
        has_completed,
        has_expired: !has_completed,
    })
}
