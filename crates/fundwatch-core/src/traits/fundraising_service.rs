// # Fundraising Service Trait
//
// Defines the interface for reading campaign snapshots from a fundraising
// platform's API.
//
// ## Implementations
//
// - Tiltify: `fundwatch-service-tiltify` crate
//
// ## Usage
//
// ```rust,ignore
// use fundwatch_core::FundraisingService;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let service = /* FundraisingService implementation */;
//
//     let campaign = service.get_campaign("campaign-id").await?;
//     let donations = service
//         .get_donations(&campaign.id, Some(chrono::Utc::now()))
//         .await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Campaign, Cause, Donation, DonationMatch, Milestone, Reward};

/// Trait for fundraising service implementations
///
/// The bearer token is part of the implementation's construction; every call
/// is authenticated with it.
///
/// # Errors
///
/// Failures are reported as [`Error::Remote`](crate::Error::Remote) carrying
/// the HTTP status (the scheduler classifies on it) or
/// [`Error::Transport`](crate::Error::Transport) when no response arrived.
///
/// # Trust Level: Untrusted
///
/// Services are isolated, stateless and single-shot:
/// - ✅ Perform HTTP calls to their API only
/// - ✅ Follow pagination within a single list call
/// - ❌ Retry or back off (owned by `PollScheduler`)
/// - ❌ Access the state store (owned by `CampaignReconciler`)
/// - ❌ Cache snapshots between calls
#[async_trait]
pub trait FundraisingService: Send + Sync {
    /// Check whether the configured token is accepted by the API
    async fn validate_token(&self) -> Result<bool, crate::Error>;

    /// Fetch a campaign by id
    async fn get_campaign(&self, campaign_id: &str) -> Result<Campaign, crate::Error>;

    /// Fetch a cause by id
    async fn get_cause(&self, cause_id: &str) -> Result<Cause, crate::Error>;

    /// Fetch all rewards of a campaign
    async fn get_rewards(&self, campaign_id: &str) -> Result<Vec<Reward>, crate::Error>;

    /// Fetch all milestones of a campaign
    async fn get_milestones(&self, campaign_id: &str) -> Result<Vec<Milestone>, crate::Error>;

    /// Fetch donations completed strictly after `completed_after`
    ///
    /// With `None`, every donation of the campaign is returned.
    async fn get_donations(
        &self,
        campaign_id: &str,
        completed_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Donation>, crate::Error>;

    /// Fetch donation matches updated strictly after `updated_after`
    async fn get_donation_matches(
        &self,
        campaign_id: &str,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<DonationMatch>, crate::Error>;

    /// Get the service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}

/// Helper trait for constructing fundraising services from configuration
pub trait FundraisingServiceFactory: Send + Sync {
    /// Create a FundraisingService instance from configuration
    fn create(
        &self,
        config: &crate::config::ServiceConfig,
    ) -> Result<Box<dyn FundraisingService>, crate::Error>;
}
