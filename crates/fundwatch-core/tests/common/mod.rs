//! Test doubles and common utilities for contract tests
//!
//! [`ScriptedService`] serves a mutable campaign snapshot and can be told to
//! fail or pause specific endpoints; [`RecordingSink`] keeps every emitted
//! event.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fundwatch_core::error::{Error, Result};
use fundwatch_core::events::{CampaignEvent, EventKind};
use fundwatch_core::model::{
    Campaign, Cause, Donation, DonationMatch, Milestone, Money, Reward, RewardClaim,
};
use fundwatch_core::reconciler::{ReconcilerContext, ReconcilerSettings};
use fundwatch_core::state::MemoryStateStore;
use fundwatch_core::traits::{EventSink, FundraisingService};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const CAMPAIGN_ID: &str = "campaign-1";
pub const CAUSE_ID: &str = "cause-1";

/// Service endpoints, for scripting failures and counting calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Campaign,
    Cause,
    Rewards,
    Milestones,
    Donations,
    DonationMatches,
}

#[derive(Default)]
struct Script {
    campaign: Campaign,
    cause: Cause,
    rewards: Vec<Reward>,
    milestones: Vec<Milestone>,
    donations: Vec<Donation>,
    donation_matches: Vec<DonationMatch>,
    /// Return every donation regardless of `completed_after`
    ignore_donation_filter: bool,
    /// Failures consumed one per call
    queued_failures: HashMap<Endpoint, VecDeque<u16>>,
    /// Failures returned on every call until cleared
    failures: HashMap<Endpoint, u16>,
    calls: HashMap<Endpoint, usize>,
    /// Calls paused until the test releases them, one per endpoint
    gates: HashMap<Endpoint, CallGate>,
}

/// Pauses one call to an endpoint until released
#[derive(Clone, Default)]
pub struct CallGate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl CallGate {
    /// Wait until the paused call has been made
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the paused call continue
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// A FundraisingService serving a scripted campaign
///
/// Clones share the same script, so a test can keep a handle while the
/// reconciler owns another.
#[derive(Clone)]
pub struct ScriptedService {
    script: Arc<Mutex<Script>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        let script = Script {
            campaign: campaign(0.0),
            cause: Cause {
                id: CAUSE_ID.into(),
                name: "Cause".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    pub fn set_amount_raised(&self, value: f64) {
        self.script.lock().unwrap().campaign.amount_raised = Money::new("USD", value);
    }

    pub fn set_campaign(&self, campaign: Campaign) {
        self.script.lock().unwrap().campaign = campaign;
    }

    pub fn set_rewards(&self, rewards: Vec<Reward>) {
        self.script.lock().unwrap().rewards = rewards;
    }

    pub fn set_milestones(&self, milestones: Vec<Milestone>) {
        self.script.lock().unwrap().milestones = milestones;
    }

    pub fn push_donation(&self, donation: Donation) {
        self.script.lock().unwrap().donations.push(donation);
    }

    pub fn push_donation_match(&self, donation_match: DonationMatch) {
        self.script.lock().unwrap().donation_matches.push(donation_match);
    }

    pub fn remove_donation(&self, id: &str) {
        self.script.lock().unwrap().donations.retain(|d| d.id != id);
    }

    pub fn ignore_donation_filter(&self) {
        self.script.lock().unwrap().ignore_donation_filter = true;
    }

    /// Fail the next call to `endpoint` with `status`
    pub fn fail_once(&self, endpoint: Endpoint, status: u16) {
        self.script
            .lock()
            .unwrap()
            .queued_failures
            .entry(endpoint)
            .or_default()
            .push_back(status);
    }

    /// Fail every call to `endpoint` with `status`
    pub fn fail_always(&self, endpoint: Endpoint, status: u16) {
        self.script.lock().unwrap().failures.insert(endpoint, status);
    }

    pub fn recover(&self, endpoint: Endpoint) {
        let mut script = self.script.lock().unwrap();
        script.failures.remove(&endpoint);
        script.queued_failures.remove(&endpoint);
    }

    /// Pause the next call to `endpoint` until the returned gate is released
    pub fn hold(&self, endpoint: Endpoint) -> CallGate {
        let gate = CallGate::default();
        self.script.lock().unwrap().gates.insert(endpoint, gate.clone());
        gate
    }

    async fn pass_gate(&self, endpoint: Endpoint) {
        let gate = self.script.lock().unwrap().gates.remove(&endpoint);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Count the call and return the scripted failure, if any
    fn enter(&self, endpoint: Endpoint) -> Result<std::sync::MutexGuard<'_, Script>> {
        let mut script = self.script.lock().unwrap();
        *script.calls.entry(endpoint).or_default() += 1;

        let queued = script
            .queued_failures
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        if let Some(status) = queued.or_else(|| script.failures.get(&endpoint).copied()) {
            return Err(Error::remote(status, format!("scripted {:?} failure", endpoint)));
        }
        Ok(script)
    }
}

#[async_trait]
impl FundraisingService for ScriptedService {
    async fn validate_token(&self) -> Result<bool> {
        Ok(true)
    }

    async fn get_campaign(&self, campaign_id: &str) -> Result<Campaign> {
        self.pass_gate(Endpoint::Campaign).await;
        let mut campaign = self.enter(Endpoint::Campaign)?.campaign.clone();
        campaign.id = campaign_id.to_string();
        Ok(campaign)
    }

    async fn get_cause(&self, cause_id: &str) -> Result<Cause> {
        let script = self.enter(Endpoint::Cause)?;
        if script.cause.id != cause_id {
            return Err(Error::remote(404, "cause not found"));
        }
        Ok(script.cause.clone())
    }

    async fn get_rewards(&self, _campaign_id: &str) -> Result<Vec<Reward>> {
        Ok(self.enter(Endpoint::Rewards)?.rewards.clone())
    }

    async fn get_milestones(&self, _campaign_id: &str) -> Result<Vec<Milestone>> {
        Ok(self.enter(Endpoint::Milestones)?.milestones.clone())
    }

    async fn get_donations(
        &self,
        _campaign_id: &str,
        completed_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Donation>> {
        let script = self.enter(Endpoint::Donations)?;
        let ignore_filter = script.ignore_donation_filter;
        Ok(script
            .donations
            .iter()
            .filter(|d| ignore_filter || completed_after.is_none_or(|after| d.completed_at > after))
            .cloned()
            .collect())
    }

    async fn get_donation_matches(
        &self,
        _campaign_id: &str,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<DonationMatch>> {
        let script = self.enter(Endpoint::DonationMatches)?;
        Ok(script
            .donation_matches
            .iter()
            .filter(|m| updated_after.is_none_or(|after| m.updated_at > after))
            .cloned()
            .collect())
    }

    fn service_name(&self) -> &'static str {
        "scripted"
    }
}

/// An EventSink that records every event
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<CampaignEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CampaignEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Drain the recorded events
    pub fn take(&self) -> Vec<CampaignEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(CampaignEvent::kind).collect()
    }

    pub fn donation_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                CampaignEvent::Donation(e) => Some(e.donation_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: CampaignEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Service, store and sink wired into a reconciler context
pub struct Harness {
    pub service: ScriptedService,
    pub store: MemoryStateStore,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            service: ScriptedService::new(),
            store: MemoryStateStore::new(),
            sink: RecordingSink::new(),
        }
    }

    pub fn context(&self) -> ReconcilerContext {
        ReconcilerContext::new(
            Arc::new(self.service.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.sink.clone()),
        )
    }

    /// Same service and store, fresh sink; models a process restart
    pub fn restarted(&self) -> Self {
        Self {
            service: self.service.clone(),
            store: self.store.clone(),
            sink: RecordingSink::new(),
        }
    }
}

/// Settings with a 10 second interval: matches every 40s, milestones every 200s
pub fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        polling_interval: Duration::from_secs(10),
        donation_matches_polling_multiplier: 4,
        milestones_polling_multiplier: 20,
        max_tracked_donation_ids: None,
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn campaign(raised: f64) -> Campaign {
    Campaign {
        id: CAMPAIGN_ID.into(),
        name: "Charity Stream".into(),
        cause_id: Some(CAUSE_ID.into()),
        amount_raised: Money::new("USD", raised),
        ..Default::default()
    }
}

pub fn donation(id: &str, amount: f64, completed_at: DateTime<Utc>) -> Donation {
    Donation {
        id: id.into(),
        amount: Money::new("USD", amount),
        donor_name: format!("Donor {}", id),
        donor_comment: None,
        completed_at,
        reward_claims: Vec::new(),
        donation_matches: Vec::new(),
    }
}

pub fn with_claim(mut donation: Donation, reward_id: &str, quantity: u32) -> Donation {
    donation.reward_claims.push(RewardClaim {
        id: format!("claim-{}", reward_id),
        reward_id: reward_id.into(),
        quantity: Some(quantity),
    });
    donation
}

pub fn reward(id: &str, quantity: Option<u32>) -> Reward {
    Reward {
        id: id.into(),
        name: format!("Reward {}", id),
        amount: Money::new("USD", 10.0),
        quantity,
        quantity_remaining: quantity,
        active: true,
        ..Default::default()
    }
}

pub fn milestone(id: &str, amount: f64) -> Milestone {
    Milestone {
        id: id.into(),
        name: format!("Milestone {}", id),
        amount: Money::new("USD", amount),
        reached: false,
    }
}

/// An active match pledging `pledged`, inserted and updated at `inserted_at`
pub fn active_match(id: &str, pledged: f64, inserted_at: DateTime<Utc>) -> DonationMatch {
    DonationMatch {
        id: id.into(),
        matched_by: format!("Matcher {}", id),
        match_type: Some("amount".into()),
        pledged_amount: Money::new("USD", pledged),
        total_amount_raised: Money::new("USD", 0.0),
        active: true,
        started_at: Some(inserted_at),
        ends_at: inserted_at + chrono::TimeDelta::hours(1),
        inserted_at,
        updated_at: inserted_at,
        completed_at: None,
    }
}

/// A partial match reference as embedded in a donation
pub fn reference(id: &str, matched_so_far: f64) -> DonationMatch {
    DonationMatch {
        id: id.into(),
        active: true,
        total_amount_raised: Money::new("USD", matched_so_far),
        ..Default::default()
    }
}
