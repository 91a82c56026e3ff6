//! Host process for the obs-studio-node server core.
//!
//! Wires the engine, the registry and the IPC server onto one event loop
//! and runs a short session against them: a client thread issues IPC
//! calls and registers callbacks while engine threads fire signals and
//! audio levels.

mod session;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use osn_engine::Engine;
use osn_events::EventLoop;
use osn_ipc::Server;
use osn_server::{AudioBindings, BindingsConfig, Registry, SignalBindings};

pub use session::SessionSummary;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "OSN_CONFIG";

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "osn_host=debug,osn_server=debug,osn_events=info,osn_engine=info,osn_ipc=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the config from `path`, or from `$OSN_CONFIG`, or fall back to
/// defaults.
pub fn load_config(path: Option<String>) -> Result<BindingsConfig> {
    let path = path
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from);

    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            BindingsConfig::load(&path)
                .with_context(|| format!("Invalid config at {}", path.display()))
        }
        None => {
            debug!("No config file given, using defaults");
            Ok(BindingsConfig::default())
        }
    }
}

/// Everything the server process owns.
pub struct Host {
    pub event_loop: EventLoop,
    pub engine: Arc<Engine>,
    pub registry: Arc<Registry>,
    pub audio: Arc<AudioBindings>,
    pub signals: Arc<SignalBindings>,
    pub server: Arc<Server>,
}

impl Host {
    pub fn new(config: &BindingsConfig) -> Result<Self> {
        let event_loop = EventLoop::new();
        let engine = Arc::new(Engine::new());
        let registry = Registry::init(config, event_loop.handle());
        let audio = AudioBindings::new(Arc::clone(&registry), Arc::clone(&engine));
        let signals = SignalBindings::new(Arc::clone(&registry), Arc::clone(&engine));

        let mut server = Server::new();
        osn_server::register(&mut server, Arc::clone(&audio))
            .context("Failed to register IPC collections")?;

        Ok(Self {
            event_loop,
            engine,
            registry,
            audio,
            signals,
            server: Arc::new(server),
        })
    }
}

/// Load config, build the host, run a session and shut down.
pub fn run(config_path: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let host = Host::new(&config)?;

    let summary = session::run(&host)?;
    info!(
        summary = %serde_json::to_string(&summary).context("Failed to encode summary")?,
        "Session finished"
    );

    if summary.leaked > 0 {
        anyhow::bail!("{} objects leaked at shutdown", summary.leaked);
    }
    Ok(())
}
