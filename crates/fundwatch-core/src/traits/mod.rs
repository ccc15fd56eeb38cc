//! Core traits for the fundwatch system
//!
//! This module defines the abstract interfaces of the poller's collaborators.
//!
//! - [`FundraisingService`]: Read campaign snapshots from the platform API
//! - [`StateStore`]: Persistent state for resuming without duplicate events
//! - [`EventSink`]: Downstream dispatch of domain events

pub mod event_sink;
pub mod fundraising_service;
pub mod state_store;

pub use event_sink::{ChannelEventSink, EventSink};
pub(crate) use event_sink::GatedEventSink;
pub use fundraising_service::{FundraisingService, FundraisingServiceFactory};
pub use state_store::{StateStore, StateStoreFactory};
pub(crate) use state_store::GatedStateStore;
