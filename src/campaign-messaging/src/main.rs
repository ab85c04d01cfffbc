//! Campaign Messaging: operator CLI for the mobile messaging core.
//!
//! `identity` derives downstream identifiers against a persisted state file; `simulate`
//! drives the in-app action queue with a deterministic scheduler and prints the resulting
//! lifecycle events.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use campaign_core::config::MessagingConfig;
use campaign_core::event_bus::capture_sink;
use campaign_mobile_sdk::display::MessageDisplayController;
use campaign_mobile_sdk::{
    ActionContext, ActionDefinition, ActionKind, ActionManager, EventSinkListener, IdentityManager,
    ImpressionLog, JsonFileStore, ManualScheduler, MessageDisplayChoice, Priority,
};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

/// Seconds a simulated delayed message waits before re-delivery.
const SIMULATED_DELAY_SECONDS: u32 = 60;

#[derive(Parser, Debug)]
#[command(name = "campaign-messaging")]
#[command(about = "In-app message queue and identity derivation tools")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML), layered under CAMPAIGN_MESSAGING__* variables
    #[arg(long, env = "CAMPAIGN_MESSAGING_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive the downstream identifier for a device and user
    Identity {
        /// Device identifier
        #[arg(long)]
        device_id: String,

        /// User identifier (anonymous when omitted)
        #[arg(long)]
        user_id: Option<String>,

        /// State file holding login state and the merge record (overrides config)
        #[arg(long, env = "CAMPAIGN_MESSAGING__IDENTITY__STATE_PATH")]
        state: Option<PathBuf>,
    },

    /// Trigger messages through the action queue and print lifecycle events
    Simulate {
        /// Number of messages to trigger
        #[arg(long, default_value = "5")]
        messages: usize,

        /// Delay every K-th message (0 disables delays)
        #[arg(long, default_value = "0")]
        delay_every: usize,
    },
}

/// Delays every `every`-th message the first time it is offered.
struct EveryNthDelayed {
    every: usize,
    delayed: Mutex<HashSet<String>>,
}

impl EveryNthDelayed {
    fn new(every: usize) -> Self {
        Self {
            every,
            delayed: Mutex::new(HashSet::new()),
        }
    }
}

impl MessageDisplayController for EveryNthDelayed {
    fn should_display_message(&self, context: &ActionContext) -> Option<MessageDisplayChoice> {
        let index: usize = context.message_id().parse().ok()?;
        if self.every == 0 || index % self.every != 0 {
            return None;
        }
        self.delayed
            .lock()
            .insert(context.message_id().to_string())
            .then(|| MessageDisplayChoice::delay(SIMULATED_DELAY_SECONDS))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = MessagingConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        MessagingConfig::default()
    });

    match cli.command {
        Commands::Identity {
            device_id,
            user_id,
            state,
        } => {
            let state_path = state.unwrap_or_else(|| PathBuf::from(&config.identity.state_path));
            run_identity(device_id, user_id, state_path)
        }
        Commands::Simulate {
            messages,
            delay_every,
        } => run_simulation(config, messages, delay_every).await,
    }
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "campaign_messaging=info,campaign_mobile_sdk=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run_identity(
    device_id: String,
    user_id: Option<String>,
    state_path: PathBuf,
) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileStore::open(&state_path));
    let user_id = user_id.unwrap_or_else(|| device_id.clone());
    let manager = IdentityManager::new(device_id, user_id, store);

    info!(
        state = %state_path.display(),
        login_state = %manager.login_state(),
        "Identity derived"
    );

    let report = json!({
        "identifier": manager.identifier(),
        "login_state": manager.login_state(),
        "anonymous": manager.is_anonymous(),
        "first_time_start": manager.is_first_time_start(),
        "device_id_hashed": manager.is_device_id_hashed(),
        "merge_user_id_hash": manager.merge_user_id_hash(),
        "profile": manager.profile(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_simulation(
    config: MessagingConfig,
    messages: usize,
    delay_every: usize,
) -> anyhow::Result<()> {
    let scheduler = Arc::new(ManualScheduler::new());
    let sink = capture_sink();
    let impressions = Arc::new(ImpressionLog::new());

    let manager = ActionManager::builder(scheduler.clone())
        .config(config.queue.clone())
        .runtime(tokio::runtime::Handle::current())
        .display_controller(Arc::new(EveryNthDelayed::new(delay_every)))
        .display_listener(Arc::new(EventSinkListener::new(sink.clone())))
        .impression_recorder(impressions.clone())
        .build();

    manager.define_action(
        ActionDefinition::new("Alert", ActionKind::MESSAGE)
            .on_present(|presentation| {
                info!(action = %presentation.context(), "Presenting message");
                Ok(true)
            })
            .on_dismiss(|presentation| {
                presentation.dismiss();
                Ok(())
            }),
    )?;

    info!(messages, delay_every, "Starting simulation");
    for index in 1..=messages {
        manager.trigger_one(ActionContext::new("Alert", index.to_string()), Priority::Default);
    }

    drain(&manager, &scheduler).await;

    for event in sink.events() {
        println!("{}", serde_json::to_string(&event)?);
    }

    let shown = (1..=messages)
        .filter(|i| impressions.message_impressions(&i.to_string()) > 0)
        .count();
    info!(
        shown,
        events = sink.count(),
        virtual_seconds = scheduler.now(),
        "Simulation finished"
    );
    Ok(())
}

/// Dismisses whatever is on screen and advances the virtual clock until the queue,
/// the scheduler and any worker pass are all idle.
async fn drain(manager: &ActionManager, scheduler: &ManualScheduler) {
    let mut idle_polls = 0;
    loop {
        if manager.is_processing() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            continue;
        }
        if let Some(presentation) = manager.current_presentation() {
            presentation.dismiss();
            idle_polls = 0;
            continue;
        }
        if scheduler.pending() > 0 {
            scheduler.advance(u64::from(SIMULATED_DELAY_SECONDS));
            continue;
        }
        if manager.queue_len() == 0 {
            break;
        }

        // Queued work that no pass picks up: paused or disabled queue.
        idle_polls += 1;
        if idle_polls > 100 {
            warn!(
                queued = manager.queue_len(),
                paused = manager.is_paused(),
                enabled = manager.is_enabled(),
                "Queue is not draining, stopping simulation"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
