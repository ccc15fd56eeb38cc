// # fundwatch-core
//
// Core library for polling fundraising campaigns.
//
// ## Architecture Overview
//
// The fundraising API offers no push mechanism, so campaigns are polled and
// every snapshot is diffed against persisted state:
// - **FundraisingService**: Trait for reading campaign snapshots from the API
// - **StateStore**: Trait for persistent state (watermarks, processed ids)
// - **EventSink**: Trait for dispatching domain events downstream
// - **CampaignReconciler**: Turns snapshots into de-duplicated events
// - **PollScheduler**: One task per campaign, retry/backoff and shutdown policy
// - **ServiceRegistry**: Plugin-based registry for services and state stores
// - **VariableRegistry**: Typed accessors over event payloads
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Reconciliation is independent of HTTP and storage
// 2. **Exactly Once**: Each donation, milestone and match transition fires once
// 3. **Plugin-Based**: Services are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Contained Failures**: A failing campaign never affects the others

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod traits;
pub mod variables;

// Re-export core types for convenience
pub use config::{CampaignConfig, FundwatchConfig, PollerConfig, ServiceConfig, StateStoreConfig};
pub use error::{Error, Result, RetryClass};
pub use events::{CampaignEvent, EventKind};
pub use reconciler::{CampaignReconciler, ReconcilerContext, ReconcilerSettings};
pub use registry::ServiceRegistry;
pub use scheduler::{PollScheduler, PollerEvent, PollerStatus, RetryMode};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{ChannelEventSink, EventSink, FundraisingService, StateStore};
pub use variables::{VariableRegistry, VariableValue};
