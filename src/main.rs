//! Nuki Activity Bridge CLI
//!
//! Polls Nuki smart lock activity logs and reports who used the keypad.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nuki_activity_bridge::{
    api::{ActivityLogEntry, LockApi, LockSettings, NukiClient, NukiClientConfig},
    commands,
    config::{Config, FallbackMode, FingerprintUserMap},
    core::Attributor,
    export::{format_event, spawn_event_consumer, JsonlWriter},
    registry::{LockRegistry, DEFAULT_EVENT_CAPACITY},
    replay,
    scheduler::{discover_locks, spawn_pollers, PollerContext},
    stats::{read_persisted, BridgeStats},
    ChannelSink, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nuki-bridge")]
#[command(version = VERSION)]
#[command(about = "Nuki activity log bridge with keypad user detection", long_about = None)]
struct Cli {
    /// Log every poll and attribution decision
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the activity logs and report new accesses
    Run {
        /// Only poll these lock ids (repeatable)
        #[arg(long = "lock")]
        locks: Vec<u64>,

        /// Seconds between two polls of a lock
        #[arg(long)]
        scan_interval: Option<u64>,

        /// Seconds of history used to correlate keypad entries
        #[arg(long)]
        detection_window: Option<u64>,

        /// Nuki Web API token (overrides the configured one)
        #[arg(long)]
        token: Option<String>,

        /// Serve lock states, events and commands on this local port
        /// (requires server feature)
        #[arg(long)]
        serve: Option<u16>,
    },

    /// List the smart locks of the account
    Locks,

    /// Show the current state of the locks
    Status {
        /// Only show this lock
        #[arg(long)]
        lock: Option<u64>,
    },

    /// Show the recent activity log with keypad user detection
    Activity {
        /// Only show this lock
        #[arg(long)]
        lock: Option<u64>,

        /// Number of entries per lock
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Unlatch (open) a lock
    Unlatch { lock_id: u64 },

    /// Lock 'n' go
    LockNGo {
        lock_id: u64,

        /// Unlatch before locking
        #[arg(long)]
        unlatch: bool,
    },

    /// Lock a lock
    Lock { lock_id: u64 },

    /// Unlock a lock
    Unlock { lock_id: u64 },

    /// Feed a saved activity log through the attribution pipeline
    Replay {
        /// JSON array of log entries as returned by the API
        #[arg(long)]
        file: PathBuf,

        /// Lock to replay (defaults to the lock of the first entry)
        #[arg(long)]
        lock_id: Option<u64>,
    },

    /// Change the stored configuration
    Configure {
        /// Nuki Web API token
        #[arg(long)]
        token: Option<String>,

        /// Keypad source to user assignment, e.g. 2=Alice (repeatable)
        #[arg(long = "fingerprint-user")]
        fingerprint_users: Vec<String>,

        /// Remove all fingerprint user assignments
        #[arg(long)]
        clear_fingerprint_users: bool,

        /// Fallback attribution mode (frequency or recency)
        #[arg(long)]
        fallback: Option<String>,

        /// IANA timezone for printed events, e.g. Europe/Berlin
        #[arg(long)]
        timezone: Option<String>,

        /// Seconds between two polls of a lock
        #[arg(long)]
        scan_interval: Option<u64>,

        /// Seconds of history used to correlate keypad entries
        #[arg(long)]
        detection_window: Option<u64>,

        /// Enable or disable enhanced logging
        #[arg(long)]
        enhanced_logging: Option<bool>,
    },

    /// Show configuration
    Config,

    /// Show statistics of previous runs
    Stats,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {e}; using defaults");
            Config::default()
        }
    };
    init_tracing(cli.verbose || config.enable_enhanced_logging);

    let session_config = config.with_verbose(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            locks,
            scan_interval,
            detection_window,
            token,
            serve,
        } => cmd_run(
            session_config,
            locks,
            scan_interval,
            detection_window,
            token,
            serve,
        ),
        Commands::Locks => cmd_locks(&config),
        Commands::Status { lock } => cmd_status(&config, lock),
        Commands::Activity { lock, limit } => cmd_activity(&config, lock, limit),
        Commands::Unlatch { lock_id } => cmd_unlatch(&config, lock_id),
        Commands::LockNGo { lock_id, unlatch } => cmd_lock_n_go(&config, lock_id, unlatch),
        Commands::Lock { lock_id } => cmd_lock(&config, lock_id),
        Commands::Unlock { lock_id } => cmd_unlock(&config, lock_id),
        Commands::Replay { file, lock_id } => cmd_replay(&session_config, &file, lock_id),
        Commands::Configure {
            token,
            fingerprint_users,
            clear_fingerprint_users,
            fallback,
            timezone,
            scan_interval,
            detection_window,
            enhanced_logging,
        } => cmd_configure(
            config,
            token,
            fingerprint_users,
            clear_fingerprint_users,
            fallback,
            timezone,
            scan_interval,
            detection_window,
            enhanced_logging,
        ),
        Commands::Config => {
            cmd_config(&config);
            Ok(())
        }
        Commands::Stats => {
            cmd_stats(&config);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Could not start async runtime")
}

fn client(config: &Config) -> anyhow::Result<NukiClient> {
    if config.api_token.trim().is_empty() {
        bail!("No API token configured. Run 'nuki-bridge configure --token <TOKEN>' first.");
    }
    Ok(NukiClient::new(NukiClientConfig::from_config(config))?)
}

fn cmd_run(
    mut config: Config,
    locks: Vec<u64>,
    scan_interval: Option<u64>,
    detection_window: Option<u64>,
    token: Option<String>,
    serve: Option<u16>,
) -> anyhow::Result<()> {
    if !locks.is_empty() {
        config.lock_ids = locks;
    }
    if let Some(secs) = scan_interval {
        config.scan_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = detection_window {
        config.fingerprint_detection_window = Duration::from_secs(secs);
    }
    if let Some(token) = token {
        config.api_token = token;
    }
    config.validate()?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let tz = config.display_timezone()?;
    let client = Arc::new(client(&config)?);

    println!("Nuki Activity Bridge v{VERSION}");
    println!();
    println!("  Scan interval: {}s", config.scan_interval.as_secs());
    println!(
        "  Detection window: {}s",
        config.fingerprint_detection_window.as_secs()
    );
    println!("  Fingerprint users: {}", config.fingerprint_users.len());
    println!("  Fallback: {:?}", config.fallback);
    println!("  Timezone: {tz}");

    #[cfg(not(feature = "server"))]
    if serve.is_some() {
        eprintln!("Warning: --serve flag ignored (server feature not enabled at compile time)");
    }

    let rt = runtime()?;
    let stats = rt.block_on(async {
        match client.test_connection().await {
            Ok(true) => println!("  API connection: OK"),
            Ok(false) => bail!("Nuki Web API rejected the connection test"),
            Err(e) => return Err(e.into()),
        }

        let locks = discover_locks(&*client, &config).await?;
        for lock in &locks {
            println!("  Lock: {} ({})", lock.name, lock.smartlock_id);
        }

        let (sink, receiver) = ChannelSink::unbounded();
        let writer = match JsonlWriter::open(&config.export_path) {
            Ok(writer) => {
                println!("  Exporting events to {:?}", writer.path());
                Some(writer)
            }
            Err(e) => {
                eprintln!("Warning: Could not open event export: {e}");
                None
            }
        };
        let consumer = spawn_event_consumer(receiver, tz, writer);

        let registry = LockRegistry::shared(DEFAULT_EVENT_CAPACITY);
        let stats = Arc::new(BridgeStats::with_persistence(
            config.data_path.join("stats.json"),
        ));

        #[cfg(feature = "server")]
        let server_shutdown = match serve {
            Some(port) => {
                use nuki_activity_bridge::server::{run, ServerConfig, ServerState};
                let state = Arc::new(ServerState::new(
                    Arc::clone(&client),
                    Arc::clone(&registry),
                    Arc::clone(&stats),
                ));
                let (addr, shutdown) = run(ServerConfig::new(port), state).await?;
                println!("  Serving on http://{addr}");
                Some(shutdown)
            }
            None => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        ctrlc_handler(shutdown_tx)?;

        println!();
        println!("Press Ctrl+C to stop");
        println!();

        let handles = spawn_pollers(
            &locks,
            &config,
            PollerContext {
                api: Arc::clone(&client),
                sink: Arc::new(sink),
                registry,
                stats: Arc::clone(&stats),
                shutdown: shutdown_rx,
            },
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Poller task failed: {}", e);
            }
        }

        #[cfg(feature = "server")]
        if let Some(shutdown) = server_shutdown {
            let _ = shutdown.send(());
        }

        // Every sender is gone once the pollers have stopped.
        if consumer.join().is_err() {
            eprintln!("Warning: event consumer panicked");
        }
        Ok::<_, anyhow::Error>(stats)
    })?;

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }

    println!();
    println!("Stopping bridge...");
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_locks(config: &Config) -> anyhow::Result<()> {
    let client = client(config)?;
    let locks = runtime()?.block_on(client.list_locks())?;

    if locks.is_empty() {
        println!("No smart locks found on this account.");
        return Ok(());
    }
    println!("{:<14} {}", "ID", "NAME");
    for lock in locks {
        let polled = if config.polls_lock(lock.smartlock_id) {
            ""
        } else {
            " (not polled)"
        };
        println!("{:<14} {}{}", lock.smartlock_id, lock.name, polled);
    }
    Ok(())
}

fn cmd_status(config: &Config, only: Option<u64>) -> anyhow::Result<()> {
    let client = client(config)?;
    let tz = config.display_timezone()?;

    runtime()?.block_on(async {
        let locks = discover_locks(&client, config).await?;
        for lock in locks
            .iter()
            .filter(|l| only.map_or(true, |id| id == l.smartlock_id))
        {
            let state = client.get_lock_status(lock.smartlock_id).await?;
            println!("{} ({})", state.name, state.smartlock_id);
            println!("  State: {}", state.state_name);
            println!(
                "  Connected: {}",
                if state.connected { "yes" } else { "no" }
            );
            match state.battery_charge {
                Some(charge) => println!("  Battery: {charge}%"),
                None => println!("  Battery: unknown"),
            }
            if state.battery_critical {
                println!("  Battery critical!");
            }
            if state.keypad_battery_critical == Some(true) {
                println!("  Keypad battery critical!");
            }
            if let Some(door) = state.door_state {
                println!("  Door: {door:?}");
            }
            if state.doorsensor_battery_critical == Some(true) {
                println!("  Door sensor battery critical!");
            }
            print_settings(&state.settings);
            if let Some(updated) = state.last_update {
                println!(
                    "  Updated: {}",
                    updated.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z")
                );
            }
            println!();
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn print_settings(settings: &LockSettings) {
    let on_off = |flag: bool| if flag { "on" } else { "off" };

    if let Some(firmware) = &settings.firmware_version {
        println!("  Firmware: {firmware}");
    }
    if let Some(mode) = settings.mode {
        println!("  Mode: {}", mode.name());
    }
    match settings.auto_lock_timeout {
        Some(secs) => println!("  Auto lock: after {secs}s"),
        None => println!("  Auto lock: off"),
    }
    if let Some(brightness) = settings.led_brightness {
        println!("  LED brightness: {brightness}");
    }
    if let Some(flag) = settings.auto_unlatch {
        println!("  Auto unlatch: {}", on_off(flag));
    }
    if let Some(flag) = settings.keypad_paired {
        println!("  Keypad paired: {}", if flag { "yes" } else { "no" });
    }
}

fn cmd_activity(config: &Config, only: Option<u64>, limit: usize) -> anyhow::Result<()> {
    let client = client(config)?;
    let tz = config.display_timezone()?;
    let attributor = Attributor::new(
        config.fingerprint_users.clone(),
        config.fingerprint_detection_window,
        config.fallback,
    );

    runtime()?.block_on(async {
        let locks = discover_locks(&client, config).await?;
        for lock in locks
            .iter()
            .filter(|l| only.map_or(true, |id| id == l.smartlock_id))
        {
            let mut entries: Vec<ActivityLogEntry> =
                client.get_activity_log(lock.smartlock_id, limit).await?;
            entries.sort_by_key(|e| e.date);

            println!("{} ({}): {} entries", lock.name, lock.smartlock_id, entries.len());
            for entry in &entries {
                let result = attributor.attribute(entry, &entries);
                println!(
                    "  [{}] {:<8} trigger={:<11} source={} name={:?} -> {} via {} ({})",
                    entry.date.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S"),
                    entry.lock_action().name(),
                    entry.trigger_kind().name(),
                    entry.source,
                    entry.name,
                    result.user,
                    result.access_method,
                    result.detection_reason
                );
            }
            println!();
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_unlatch(config: &Config, lock_id: u64) -> anyhow::Result<()> {
    let client = client(config)?;
    runtime()?.block_on(commands::unlatch(&client, lock_id))?;
    println!("Unlatch sent to lock {lock_id}.");
    Ok(())
}

fn cmd_lock_n_go(config: &Config, lock_id: u64, unlatch: bool) -> anyhow::Result<()> {
    let client = client(config)?;
    runtime()?.block_on(commands::lock_n_go(&client, lock_id, unlatch))?;
    if unlatch {
        println!("Lock 'n' go with unlatch sent to lock {lock_id}.");
    } else {
        println!("Lock 'n' go sent to lock {lock_id}.");
    }
    Ok(())
}

fn cmd_lock(config: &Config, lock_id: u64) -> anyhow::Result<()> {
    let client = client(config)?;
    runtime()?.block_on(commands::lock(&client, lock_id))?;
    println!("Lock sent to lock {lock_id}.");
    Ok(())
}

fn cmd_unlock(config: &Config, lock_id: u64) -> anyhow::Result<()> {
    let client = client(config)?;
    runtime()?.block_on(commands::unlock(&client, lock_id))?;
    println!("Unlock sent to lock {lock_id}.");
    Ok(())
}

fn cmd_replay(config: &Config, file: &std::path::Path, lock_id: Option<u64>) -> anyhow::Result<()> {
    let entries = replay::load_entries(file)
        .with_context(|| format!("Could not read activity log from {file:?}"))?;
    let Some(lock_id) = lock_id.or_else(|| entries.first().map(|e| e.smartlock_id)) else {
        println!("No log entries in {file:?}");
        return Ok(());
    };

    let tz = config.display_timezone()?;
    let (sink, receiver) = ChannelSink::unbounded();
    let events = runtime()?.block_on(replay::replay(entries, lock_id, config, &sink))?;
    drop(sink);

    for event in receiver.try_iter() {
        println!("{}", format_event(&event, tz));
    }
    println!();
    println!("Replayed {} events for lock {}", events.len(), lock_id);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_configure(
    mut config: Config,
    token: Option<String>,
    fingerprint_users: Vec<String>,
    clear_fingerprint_users: bool,
    fallback: Option<String>,
    timezone: Option<String>,
    scan_interval: Option<u64>,
    detection_window: Option<u64>,
    enhanced_logging: Option<bool>,
) -> anyhow::Result<()> {
    if let Some(token) = token {
        config.api_token = token;
    }
    if clear_fingerprint_users {
        config.fingerprint_users = FingerprintUserMap::default();
    }
    if !fingerprint_users.is_empty() {
        config.fingerprint_users =
            FingerprintUserMap::parse_assignments(fingerprint_users.iter().map(String::as_str))?;
    }
    if let Some(fallback) = fallback {
        config.fallback = fallback.parse::<FallbackMode>()?;
    }
    if let Some(timezone) = timezone {
        config.timezone = timezone;
    }
    if let Some(secs) = scan_interval {
        config.scan_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = detection_window {
        config.fingerprint_detection_window = Duration::from_secs(secs);
    }
    if let Some(enabled) = enhanced_logging {
        config.enable_enhanced_logging = enabled;
    }

    config.validate()?;
    config.save()?;
    println!("Configuration saved to {:?}", Config::config_path());
    Ok(())
}

fn cmd_config(config: &Config) {
    let mut shown = config.clone();
    if !shown.api_token.is_empty() {
        shown.api_token = "********".to_string();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&shown).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_stats(config: &Config) {
    let stats_path = config.data_path.join("stats.json");
    if !stats_path.exists() {
        println!("No previous run data found.");
        return;
    }

    match read_persisted(&stats_path) {
        Ok(stats) => {
            println!("Cumulative Statistics:");
            println!("  Successful polls: {}", stats.successful_ticks);
            println!("  Failed polls: {}", stats.failed_ticks);
            println!("  Entries recorded at startup: {}", stats.primed_entries);
            println!("  Events emitted: {}", stats.emitted_events);
            println!("  Keypad users attributed: {}", stats.attributed_events);
            println!("  Keypad users unresolved: {}", stats.unresolved_events);
            println!("  Last updated: {}", stats.last_updated);
        }
        Err(e) => eprintln!("Error reading statistics: {e}"),
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        let _ = shutdown.send(true);
    })
    .context("Error setting Ctrl+C handler")
}
