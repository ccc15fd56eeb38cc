//! Milestone bookkeeping
//!
//! `reached` is tracked locally and is sticky per milestone id: a fresh copy
//! from the service never clears it.

use std::collections::HashMap;

use crate::events::{CampaignEvent, MilestoneReachedEvent};
use crate::model::{Campaign, Milestone, Money};

/// Merge freshly fetched milestones with the known ones
///
/// The fetched list wins for everything except `reached`, which is carried
/// over by id. Milestones that disappeared from the service are dropped.
pub(crate) fn merge_milestones(known: &[Milestone], fetched: Vec<Milestone>) -> Vec<Milestone> {
    let reached: HashMap<&str, bool> = known
        .iter()
        .map(|milestone| (milestone.id.as_str(), milestone.reached))
        .collect();

    fetched
        .into_iter()
        .map(|mut milestone| {
            milestone.reached = reached.get(milestone.id.as_str()).copied().unwrap_or(false);
            milestone
        })
        .collect()
}

/// Whether `raised` covers the milestone amount
pub(crate) fn is_satisfied(milestone: &Milestone, raised: &Money) -> bool {
    raised.value >= milestone.amount.value
}

/// Mark milestones crossed by the campaign total and build their events
///
/// Each milestone id fires at most once; the caller persists the updated list.
pub(crate) fn mark_newly_reached(
    milestones: &mut [Milestone],
    campaign: &Campaign,
) -> Vec<CampaignEvent> {
    milestones
        .iter_mut()
        .filter(|milestone| !milestone.reached && is_satisfied(milestone, &campaign.amount_raised))
        .map(|milestone| {
            milestone.reached = true;
            CampaignEvent::MilestoneReached(MilestoneReachedEvent {
                campaign_id: campaign.id.clone(),
                campaign_name: campaign.name.clone(),
                milestone_id: milestone.id.clone(),
                name: milestone.name.clone(),
                amount: milestone.amount.clone(),
                campaign_amount_raised: campaign.amount_raised.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milestone(id: &str, amount: f64, reached: bool) -> Milestone {
        Milestone {
            id: id.into(),
            name: format!("Milestone {}", id),
            amount: Money::new("USD", amount),
            reached,
        }
    }

    fn campaign(raised: f64) -> Campaign {
        Campaign {
            id: "c1".into(),
            name: "Campaign".into(),
            amount_raised: Money::new("USD", raised),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_keeps_reached_and_drops_removed() {
        let known = vec![milestone("a", 100.0, true), milestone("gone", 50.0, true)];
        let fetched = vec![milestone("a", 150.0, false), milestone("new", 200.0, false)];

        let merged = merge_milestones(&known, fetched);

        assert_eq!(merged.len(), 2);
        assert!(merged[0].reached);
        assert_eq!(merged[0].amount.value, 150.0);
        assert!(!merged[1].reached);
    }

    #[test]
    fn test_mark_newly_reached_fires_once() {
        let mut milestones = vec![milestone("m500", 500.0, false), milestone("m1000", 1000.0, false)];

        assert!(mark_newly_reached(&mut milestones, &campaign(450.0)).is_empty());

        let events = mark_newly_reached(&mut milestones, &campaign(520.0));
        assert_eq!(events.len(), 1);
        match &events[0] {
            CampaignEvent::MilestoneReached(e) => {
                assert_eq!(e.milestone_id, "m500");
                assert_eq!(e.campaign_amount_raised.value, 520.0);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(mark_newly_reached(&mut milestones, &campaign(600.0)).is_empty());
        assert!(milestones[0].reached);
        assert!(!milestones[1].reached);
    }

    #[test]
    fn test_exact_amount_is_satisfied() {
        assert!(is_satisfied(&milestone("a", 500.0, false), &Money::new("USD", 500.0)));
        assert!(!is_satisfied(&milestone("a", 500.0, false), &Money::new("USD", 499.99)));
    }
}
