// # fundwatchd - Fundraising Campaign Poller Daemon
//
// This is a THIN integration layer: all polling, reconciliation and retry
// logic lives in fundwatch-core. Configuration is via environment variables
// only.
//
// The fundwatchd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering services and creating the state store
// 4. Starting one poller per campaign and logging the emitted events
// 5. Stopping pollers and flushing state on SIGINT/SIGTERM
//
// ## Configuration
//
// ### Service
// - `FUNDWATCH_SERVICE_TYPE`: Fundraising service (tiltify)
// - `FUNDWATCH_API_TOKEN`: API access token
// - `FUNDWATCH_API_BASE_URL`: API base URL override (optional)
//
// ### Campaigns
// - `FUNDWATCH_CAMPAIGNS`: Comma-separated campaign ids, each optionally
//   suffixed with `:<interval_secs>`
// - `FUNDWATCH_POLL_INTERVAL_SECS`: Default polling interval (seconds)
//
// ### State Store
// - `FUNDWATCH_STATE_STORE_TYPE`: Type of state store (file, memory)
// - `FUNDWATCH_STATE_STORE_PATH`: Path to state file (for file store)
//
// ### Poller
// - `FUNDWATCH_MAX_RETRIES`: Backoff attempts before a campaign shuts down
// - `FUNDWATCH_INITIAL_DELAY_MS`: Base backoff delay
// - `FUNDWATCH_MAX_DELAY_MS`: Backoff delay cap
// - `FUNDWATCH_MAX_TRACKED_DONATION_IDS`: Donation id retention (optional)
//
// ## Example
//
// ```bash
// export FUNDWATCH_API_TOKEN=your_token
// export FUNDWATCH_CAMPAIGNS=4f6a...e2,9b1c...77:30
// export FUNDWATCH_STATE_STORE_TYPE=file
// export FUNDWATCH_STATE_STORE_PATH=/var/lib/fundwatch/state.json
//
// fundwatchd
// ```

use anyhow::{Context, Result};
use fundwatch_core::traits::{FundraisingService, StateStore};
use fundwatch_core::{
    CampaignConfig, CampaignEvent, ChannelEventSink, FundwatchConfig, PollScheduler, PollerConfig,
    PollerEvent, ReconcilerContext, ServiceConfig, ServiceRegistry, StateStoreConfig,
    VariableRegistry,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time allowed for pollers to finish after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum FundwatchExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (every campaign stopped, unexpected failure)
    RuntimeError = 2,
}

impl From<FundwatchExitCode> for ExitCode {
    fn from(code: FundwatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    service_type: String,
    api_token: String,
    api_base_url: Option<String>,
    campaigns: Vec<CampaignConfig>,
    state_store_type: String,
    state_store_path: Option<String>,
    max_retries: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_tracked_donation_ids: Option<usize>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let default_interval: u64 = parse_env("FUNDWATCH_POLL_INTERVAL_SECS")?.unwrap_or(15);

        Ok(Self {
            service_type: env::var("FUNDWATCH_SERVICE_TYPE")
                .unwrap_or_else(|_| "tiltify".to_string()),
            api_token: env::var("FUNDWATCH_API_TOKEN").context("FUNDWATCH_API_TOKEN is not set")?,
            api_base_url: env::var("FUNDWATCH_API_BASE_URL").ok().filter(|s| !s.is_empty()),
            campaigns: parse_campaigns(
                &env::var("FUNDWATCH_CAMPAIGNS").unwrap_or_default(),
                default_interval,
            )?,
            state_store_type: env::var("FUNDWATCH_STATE_STORE_TYPE")
                .unwrap_or_else(|_| "file".to_string()),
            state_store_path: env::var("FUNDWATCH_STATE_STORE_PATH").ok(),
            max_retries: parse_env("FUNDWATCH_MAX_RETRIES")?,
            initial_delay_ms: parse_env("FUNDWATCH_INITIAL_DELAY_MS")?,
            max_delay_ms: parse_env("FUNDWATCH_MAX_DELAY_MS")?,
            max_tracked_donation_ids: parse_env("FUNDWATCH_MAX_TRACKED_DONATION_IDS")?,
            log_level: env::var("FUNDWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks what the core configuration cannot know about: placeholder
    /// tokens, state file location, numeric ranges and the log level.
    fn validate(&self) -> Result<()> {
        if self.api_token.is_empty() {
            anyhow::bail!(
                "FUNDWATCH_API_TOKEN is required. \
                Set it via: export FUNDWATCH_API_TOKEN=your_token"
            );
        }

        // Check for obvious placeholder tokens (common mistake)
        let token_lower = self.api_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower == "token"
        {
            anyhow::bail!(
                "FUNDWATCH_API_TOKEN appears to be a placeholder. \
                Use an access token from your fundraising platform."
            );
        }

        match self.service_type.as_str() {
            "tiltify" => {}
            _ => anyhow::bail!(
                "FUNDWATCH_SERVICE_TYPE '{}' is not supported. \
                Supported services: tiltify",
                self.service_type
            ),
        }

        match self.state_store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "FUNDWATCH_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.state_store_type
            ),
        }

        if self.campaigns.is_empty() {
            anyhow::bail!(
                "FUNDWATCH_CAMPAIGNS must contain at least one campaign id. \
                Set it via: export FUNDWATCH_CAMPAIGNS=<campaign-id>[:<interval_secs>],..."
            );
        }

        for campaign in &self.campaigns {
            if !(5..=3600).contains(&campaign.polling_interval_secs) {
                anyhow::bail!(
                    "Polling interval of campaign {} must be between 5 and 3600 seconds. Got: {}",
                    campaign.id,
                    campaign.polling_interval_secs
                );
            }
        }

        if self.state_store_type == "file" {
            let Some(path) = self.state_store_path.as_deref().filter(|p| !p.is_empty()) else {
                anyhow::bail!(
                    "FUNDWATCH_STATE_STORE_PATH is required when FUNDWATCH_STATE_STORE_TYPE=file. \
                    Set it via: export FUNDWATCH_STATE_STORE_PATH=/var/lib/fundwatch/state.json"
                );
            };

            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "FUNDWATCH_STATE_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        if let Some(max_retries) = self.max_retries
            && !(1..=50).contains(&max_retries)
        {
            anyhow::bail!(
                "FUNDWATCH_MAX_RETRIES must be between 1 and 50. Got: {}",
                max_retries
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "FUNDWATCH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the core configuration
    fn to_fundwatch_config(&self) -> Result<FundwatchConfig> {
        let mut poller = PollerConfig::default();
        if let Some(max_retries) = self.max_retries {
            poller.max_retries = max_retries;
        }
        if let Some(initial_delay_ms) = self.initial_delay_ms {
            poller.initial_delay_ms = initial_delay_ms;
        }
        if let Some(max_delay_ms) = self.max_delay_ms {
            poller.max_delay_ms = max_delay_ms;
        }
        poller.max_tracked_donation_ids = self.max_tracked_donation_ids;

        let state_store = match self.state_store_type.as_str() {
            "memory" => StateStoreConfig::Memory,
            _ => StateStoreConfig::File {
                path: self.state_store_path.clone().unwrap_or_default(),
            },
        };

        let config = FundwatchConfig {
            service: ServiceConfig::Tiltify {
                access_token: self.api_token.clone(),
                base_url: self.api_base_url.clone(),
            },
            state_store,
            campaigns: self.campaigns.clone(),
            poller,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse an optional numeric environment variable
fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, value, e)),
        _ => Ok(None),
    }
}

/// Parse `id[:interval_secs],...`
fn parse_campaigns(value: &str, default_interval_secs: u64) -> Result<Vec<CampaignConfig>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((id, interval)) => {
                let secs = interval.trim().parse().with_context(|| {
                    format!("Invalid polling interval '{}' for campaign {}", interval, id)
                })?;
                Ok(CampaignConfig::new(id.trim()).with_polling_interval_secs(secs))
            }
            None => Ok(CampaignConfig::new(entry).with_polling_interval_secs(default_interval_secs)),
        })
        .collect()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return FundwatchExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return FundwatchExitCode::ConfigError.into();
    }

    let fundwatch_config = match config.to_fundwatch_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration validation error: {}", e);
            return FundwatchExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return FundwatchExitCode::ConfigError.into();
    }

    info!("Starting fundwatchd daemon");
    info!(
        "Configuration loaded: {} campaign(s), {} state store",
        fundwatch_config.campaigns.len(),
        fundwatch_config.state_store.type_name()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FundwatchExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(fundwatch_config).await {
            Ok(()) => FundwatchExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup failed: {:#}", e);
                FundwatchExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {:#}", e);
                FundwatchExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Failure of the daemon, split by exit code
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Items consumed by the daemon's event loop
enum DaemonEvent {
    Campaign(CampaignEvent),
    Poller(PollerEvent),
}

/// Run the daemon
async fn run_daemon(config: FundwatchConfig) -> std::result::Result<(), DaemonError> {
    let registry = ServiceRegistry::with_builtin_stores();

    #[cfg(feature = "tiltify")]
    {
        info!("Registering Tiltify service");
        fundwatch_service_tiltify::register(&registry);
    }

    let service: Arc<dyn FundraisingService> = Arc::from(
        registry
            .create_service(&config.service)
            .map_err(|e| DaemonError::Startup(e.into()))?,
    );

    match service.validate_token().await {
        Ok(true) => info!("Access token accepted by {}", service.service_name()),
        Ok(false) => {
            return Err(DaemonError::Startup(anyhow::anyhow!(
                "Access token rejected by {}",
                service.service_name()
            )));
        }
        Err(e) => warn!("Could not validate access token, continuing: {}", e),
    }

    let store: Arc<dyn StateStore> = Arc::from(
        registry
            .create_state_store(&config.state_store)
            .await
            .map_err(|e| DaemonError::Startup(e.into()))?,
    );

    let (sink, event_rx) = ChannelEventSink::new(config.poller.event_channel_capacity);
    let ctx = ReconcilerContext::new(service, store.clone(), Arc::new(sink));
    let (scheduler, poller_rx) =
        PollScheduler::new(ctx, config.poller.clone()).map_err(|e| DaemonError::Startup(e.into()))?;

    for campaign in config.campaigns.iter().filter(|c| c.enabled) {
        if let Err(e) = scheduler.start(&campaign.id, campaign.polling_interval()).await {
            error!("Campaign {} not started: {}", campaign.id, e);
        }
    }

    let active = scheduler.active_campaigns().await;
    if active.is_empty() {
        return Err(DaemonError::Startup(anyhow::anyhow!("No campaign could be started")));
    }
    info!("Polling {} campaign(s): {}", active.len(), active.join(", "));

    let outcome = consume_events(event_rx, poller_rx).await;

    info!("Stopping pollers");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler.shutdown())
        .await
        .is_err()
    {
        warn!("Pollers did not finish within {:?}", SHUTDOWN_TIMEOUT);
    }

    if let Err(e) = store.flush().await {
        error!("Failed to flush state: {}", e);
    } else {
        info!("State flushed");
    }

    outcome.map_err(DaemonError::Runtime)
}

/// Log every event until a shutdown signal arrives or no campaign is left
async fn consume_events(
    event_rx: tokio::sync::mpsc::Receiver<CampaignEvent>,
    poller_rx: tokio::sync::mpsc::Receiver<PollerEvent>,
) -> Result<()> {
    let variables = VariableRegistry::with_defaults();
    let campaign_events = ReceiverStream::new(event_rx).map(DaemonEvent::Campaign);
    let poller_events = ReceiverStream::new(poller_rx).map(DaemonEvent::Poller);
    let mut events = campaign_events.merge(poller_events);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                let signal = signal?;
                info!("Received shutdown signal: {}", signal);
                return Ok(());
            }

            event = events.next() => match event {
                Some(DaemonEvent::Campaign(event)) => {
                    info!(
                        "{} on campaign {}: {}",
                        event.kind(),
                        event.campaign_id(),
                        variables.render(&event)
                    );
                }
                Some(DaemonEvent::Poller(PollerEvent::Disconnected)) => {
                    anyhow::bail!("All campaigns stopped polling");
                }
                Some(DaemonEvent::Poller(event)) => {
                    info!("Poller event: {:?}", event);
                }
                None => anyhow::bail!("Event channels closed"),
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
