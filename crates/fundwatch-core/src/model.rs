//! Snapshot types returned by the fundraising service
//!
//! These mirror the public API payloads closely enough to deserialize them
//! directly, with lenient defaults for the fields the API omits or returns
//! inconsistently. The same types are persisted in the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A monetary amount
///
/// The API encodes values as decimal strings (`"12.50"`); plain JSON numbers
/// are accepted as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Money {
    /// ISO currency code
    #[serde(default)]
    pub currency: String,

    /// Amount in major units
    #[serde(deserialize_with = "deserialize_amount", default)]
    pub value: f64,
}

impl Money {
    /// Create an amount
    pub fn new(currency: impl Into<String>, value: f64) -> Self {
        Self {
            currency: currency.into(),
            value,
        }
    }
}

fn deserialize_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(value) => Ok(value),
        Amount::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Fundraising totals and identity of a campaign
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub slug: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    /// Empty or missing on campaigns the API cannot attribute
    #[serde(default)]
    pub cause_id: Option<String>,

    #[serde(default)]
    pub amount_raised: Money,

    #[serde(default)]
    pub total_amount_raised: Option<Money>,

    #[serde(default)]
    pub goal: Option<Money>,
}

impl Campaign {
    /// Cause id, if present and non-empty
    pub fn cause_id(&self) -> Option<&str> {
        self.cause_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// The charity a campaign raises money for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub slug: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// A reward donors can claim with a donation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub amount: Money,

    /// `None` for rewards with unlimited stock
    #[serde(default)]
    pub quantity: Option<u32>,

    #[serde(default)]
    pub quantity_remaining: Option<u32>,

    #[serde(default)]
    pub active: bool,
}

impl Reward {
    /// Whether the reward has a finite stock
    pub fn is_limited(&self) -> bool {
        self.quantity.is_some()
    }
}

/// A fundraising threshold
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub amount: Money,

    /// Sticky once true for a given id; tracked locally, never sent by the API
    #[serde(default)]
    pub reached: bool,
}

/// A reward claimed on a donation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardClaim {
    #[serde(default)]
    pub id: String,

    pub reward_id: String,

    /// The API omits the quantity for single claims
    #[serde(default)]
    pub quantity: Option<u32>,
}

impl RewardClaim {
    /// Claimed quantity, at least one
    pub fn quantity(&self) -> u32 {
        self.quantity.unwrap_or(1).max(1)
    }
}

/// A completed donation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: String,

    #[serde(default)]
    pub amount: Money,

    #[serde(default)]
    pub donor_name: String,

    #[serde(default)]
    pub donor_comment: Option<String>,

    pub completed_at: DateTime<Utc>,

    #[serde(default)]
    pub reward_claims: Vec<RewardClaim>,

    /// Partial match records; their `updated_at` is not trustworthy
    #[serde(default)]
    pub donation_matches: Vec<DonationMatch>,
}

/// A pledge by a third party to match donations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DonationMatch {
    pub id: String,

    /// Display name of the matcher
    #[serde(default)]
    pub matched_by: String,

    /// `"all"` or `"amount"`
    #[serde(default)]
    pub match_type: Option<String>,

    #[serde(default)]
    pub pledged_amount: Money,

    /// Amount matched so far
    #[serde(default)]
    pub total_amount_raised: Money,

    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ends_at: DateTime<Utc>,

    #[serde(default)]
    pub inserted_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DonationMatch {
    /// Whether the pledge has been matched in full
    pub fn is_fully_matched(&self) -> bool {
        self.total_amount_raised.value >= self.pledged_amount.value
    }
}
