//! Typed variable accessors over campaign events
//!
//! Downstream consumers (overlays, chat bots) address event fields through
//! stable string keys such as `donationAmount`. Each key is registered with
//! the event kinds it applies to and a typed extraction function, so a bad
//! key or a key used on the wrong event is an error instead of a silent
//! empty value.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::{CampaignEvent, EventKind};

/// Value of a variable
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariableValue {
    Text(String),
    Number(f64),
    Integer(i64),
    Bool(bool),
    List(Vec<String>),
}

/// Extraction function of a variable
///
/// Returns `None` only for events of a kind the variable was not registered
/// for.
pub type Extractor = fn(&CampaignEvent) -> Option<VariableValue>;

struct Variable {
    kinds: Vec<EventKind>,
    extract: Extractor,
}

/// Registry of event variables
#[derive(Default)]
pub struct VariableRegistry {
    variables: BTreeMap<String, Variable>,
}

impl VariableRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in variables
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (key, kinds, extract) in DEFAULT_VARIABLES {
            if let Err(e) = registry.register(*key, kinds, *extract) {
                warn!("Skipping built-in variable {}: {}", key, e);
            }
        }
        registry
    }

    /// Register a variable
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` when the key is empty or already registered, or
    /// when no event kind is given.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        kinds: &[EventKind],
        extract: Extractor,
    ) -> Result<()> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::invalid_input("Variable key cannot be empty"));
        }
        if kinds.is_empty() {
            return Err(Error::invalid_input(format!(
                "Variable {} must apply to at least one event kind",
                key
            )));
        }
        if self.variables.contains_key(&key) {
            return Err(Error::invalid_input(format!("Variable {} is already registered", key)));
        }

        let mut kinds = kinds.to_vec();
        kinds.dedup();
        self.variables.insert(key, Variable { kinds, extract });
        Ok(())
    }

    /// Resolve one variable against an event
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` for an unknown key
    /// - `Error::InvalidInput` when the key does not apply to the event's kind
    pub fn resolve(&self, key: &str, event: &CampaignEvent) -> Result<VariableValue> {
        let variable = self
            .variables
            .get(key)
            .ok_or_else(|| Error::not_found(format!("Unknown variable: {}", key)))?;

        if !variable.kinds.contains(&event.kind()) {
            return Err(Error::invalid_input(format!(
                "Variable {} does not apply to {} events",
                key,
                event.kind()
            )));
        }

        (variable.extract)(event).ok_or_else(|| {
            Error::invalid_input(format!("Variable {} has no value for {} events", key, event.kind()))
        })
    }

    /// Keys applicable to events of `kind`, sorted
    pub fn keys_for(&self, kind: EventKind) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|(_, variable)| variable.kinds.contains(&kind))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Every applicable variable of `event` as a JSON object
    pub fn render(&self, event: &CampaignEvent) -> serde_json::Value {
        let kind = event.kind();
        let values: serde_json::Map<String, serde_json::Value> = self
            .variables
            .iter()
            .filter(|(_, variable)| variable.kinds.contains(&kind))
            .filter_map(|(key, variable)| {
                let value = (variable.extract)(event)?;
                serde_json::to_value(value).ok().map(|value| (key.clone(), value))
            })
            .collect();
        serde_json::Value::Object(values)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

const ALL: &[EventKind] = &EventKind::ALL;
const DONATION: &[EventKind] = &[EventKind::Donation];
const MILESTONE: &[EventKind] = &[EventKind::MilestoneReached];
const MATCH_STARTED: &[EventKind] = &[EventKind::DonationMatchStarted];
const MATCH_ENDED: &[EventKind] = &[EventKind::DonationMatchEnded];
const MATCH: &[EventKind] = &[EventKind::DonationMatchStarted, EventKind::DonationMatchEnded];
const WITH_TOTALS: &[EventKind] = &[EventKind::Donation, EventKind::MilestoneReached];

const DEFAULT_VARIABLES: &[(&str, &[EventKind], Extractor)] = &[
    ("campaignId", ALL, |event| {
        Some(VariableValue::Text(event.campaign_id().to_string()))
    }),
    ("campaignName", WITH_TOTALS, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::Text(e.campaign_name.clone())),
        CampaignEvent::MilestoneReached(e) => Some(VariableValue::Text(e.campaign_name.clone())),
        _ => None,
    }),
    ("campaignAmountRaised", WITH_TOTALS, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::Number(e.campaign_amount_raised.value)),
        CampaignEvent::MilestoneReached(e) => {
            Some(VariableValue::Number(e.campaign_amount_raised.value))
        }
        _ => None,
    }),
    ("donationAmount", DONATION, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::Number(e.amount.value)),
        _ => None,
    }),
    ("donationCurrency", DONATION, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::Text(e.amount.currency.clone())),
        _ => None,
    }),
    ("donationFrom", DONATION, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::Text(e.donor_name.clone())),
        _ => None,
    }),
    ("donationMessage", DONATION, |event| match event {
        CampaignEvent::Donation(e) => {
            Some(VariableValue::Text(e.comment.clone().unwrap_or_default()))
        }
        _ => None,
    }),
    ("donationRewards", DONATION, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::List(
            e.reward_claims
                .iter()
                .map(|claim| match &claim.reward {
                    Some(reward) => reward.name.clone(),
                    None => claim.reward_id.clone(),
                })
                .collect(),
        )),
        _ => None,
    }),
    ("donationMatchedBy", DONATION, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::List(e.matched_by.clone())),
        _ => None,
    }),
    ("matchMultiplier", DONATION, |event| match event {
        CampaignEvent::Donation(e) => Some(VariableValue::Integer(i64::from(e.match_multiplier))),
        _ => None,
    }),
    ("milestoneName", MILESTONE, |event| match event {
        CampaignEvent::MilestoneReached(e) => Some(VariableValue::Text(e.name.clone())),
        _ => None,
    }),
    ("milestoneAmount", MILESTONE, |event| match event {
        CampaignEvent::MilestoneReached(e) => Some(VariableValue::Number(e.amount.value)),
        _ => None,
    }),
    ("donationMatchName", MATCH, |event| match event {
        CampaignEvent::DonationMatchStarted(e) => Some(VariableValue::Text(e.matched_by.clone())),
        CampaignEvent::DonationMatchEnded(e) => Some(VariableValue::Text(e.matched_by.clone())),
        _ => None,
    }),
    ("donationMatchPledged", MATCH, |event| match event {
        CampaignEvent::DonationMatchStarted(e) => Some(VariableValue::Number(e.pledged_amount.value)),
        CampaignEvent::DonationMatchEnded(e) => Some(VariableValue::Number(e.pledged_amount.value)),
        _ => None,
    }),
    ("donationMatchAmount", MATCH, |event| match event {
        CampaignEvent::DonationMatchStarted(e) => Some(VariableValue::Number(e.amount_matched.value)),
        CampaignEvent::DonationMatchEnded(e) => Some(VariableValue::Number(e.amount_matched.value)),
        _ => None,
    }),
    ("donationMatchEndsAt", MATCH_STARTED, |event| match event {
        CampaignEvent::DonationMatchStarted(e) => Some(VariableValue::Integer(e.ends_at)),
        _ => None,
    }),
    ("donationMatchTimeRemaining", MATCH_STARTED, |event| match event {
        CampaignEvent::DonationMatchStarted(e) => Some(VariableValue::Integer(e.time_remaining_secs)),
        _ => None,
    }),
    ("donationMatchCompleted", MATCH_ENDED, |event| match event {
        CampaignEvent::DonationMatchEnded(e) => Some(VariableValue::Bool(e.has_completed)),
        _ => None,
    }),
    ("donationMatchExpired", MATCH_ENDED, |event| match event {
        CampaignEvent::DonationMatchEnded(e) => Some(VariableValue::Bool(e.has_expired)),
        _ => None,
    }),
];
