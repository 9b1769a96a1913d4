use anyhow::Result;
use clap::Parser;
use frontdoor::error::{EventBusError, GpioError};
use frontdoor::gpio::EchoResponse;
use frontdoor::recognition::{Collaborators, CommandCamera, HttpRecognizer, LoggingFeedback, ServiceWhitelist};
use frontdoor::{
    DoorOrchestrator, EventBus, EventFilter, FrontdoorConfig, MockGpio, PinController,
    RecoveryConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "frontdoor")]
#[command(about = "Door access controller with presence sensing and face recognition")]
#[command(version)]
#[command(long_about = "Watches the front door with an ultrasonic distance sensor and a \
doorbell button, asks a face recognition service who is there, and drives the door lock \
for recognised visitors. Runs on a Raspberry Pi; without GPIO it keeps running with \
recognition only.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "frontdoor.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't start components
    #[arg(long, help = "Perform dry run - initialize components but don't start them")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Use in-memory pins instead of the GPIO controller
    #[arg(long, help = "Simulate the door hardware with in-memory pins")]
    simulate: bool,

    /// Distance reported by the simulated sensor
    #[arg(long, value_name = "CM", default_value_t = 120.0, help = "Visitor distance in cm for --simulate")]
    simulate_distance: f64,

    /// Keyboard doorbell: SPACE rings, q quits
    #[arg(short, long, help = "Enable the keyboard doorbell (SPACE rings, q quits)")]
    keyboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting frontdoor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let config = match FrontdoorConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match config.validate() {
        Ok(()) if args.validate_config => {
            info!("Configuration validation successful");
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    let event_bus = if args.debug {
        EventBus::with_debug_logging(config.system.event_bus_capacity)
    } else {
        EventBus::new(config.system.event_bus_capacity)
    };
    let audit_cancel = CancellationToken::new();
    spawn_audit_log(&event_bus, audit_cancel.clone());

    let gpio = open_gpio(&args, &config);

    // External collaborators
    let recognizer = Arc::new(HttpRecognizer::new(&config.recognition)?);
    let whitelist = Arc::new(ServiceWhitelist::new(&config.recognition)?);
    let collaborators = Collaborators {
        camera: Arc::new(CommandCamera::new(&config.camera)),
        recognizer: recognizer.clone(),
        whitelist: whitelist.clone(),
        feedback: Arc::new(LoggingFeedback::new(event_bus.clone())),
    };
    let refresh_interval = config.recognition.whitelist_refresh_interval();

    let mut orchestrator = DoorOrchestrator::new(config, gpio, collaborators, event_bus);
    orchestrator.set_keyboard_enabled(args.keyboard);

    // Initialize all components
    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    // Handle dry run mode
    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        for (component, state) in orchestrator.get_all_component_states().await {
            println!("  {:<12} {:?}", component, state);
        }
        println!("✓ Dry run completed successfully - all components initialized");
        return Ok(());
    }

    // Recognition service comes up in the background; cycles report it as
    // initialising until then
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = recognizer.initialize(RecoveryConfig::default()).await {
            error!("Recognition service unavailable: {}", e);
        }
    });
    tokio::spawn(whitelist.run_refresh_loop(refresh_interval, RecoveryConfig::default(), cancel));

    // Start all components
    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    // Run the main application loop with signal handling
    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;
    audit_cancel.cancel();

    info!("frontdoor exited with code: {}", exit_code);

    // Exit with appropriate code for systemd
    std::process::exit(exit_code);
}

/// Find the pin controller, or the reason the door runs without one
fn open_gpio(args: &Args, config: &FrontdoorConfig) -> std::result::Result<PinController, GpioError> {
    if args.simulate {
        info!(
            "Simulating door hardware, visitor at {} cm",
            args.simulate_distance
        );
        let mock = MockGpio::new();
        mock.attach_echo(
            config.sensor.trigger_pin,
            config.sensor.echo_pin,
            EchoResponse::for_distance(args.simulate_distance, config.sensor.speed_of_sound_cm_per_s),
        );
        return Ok(PinController::new(Arc::new(mock)));
    }

    if !config.gpio.enabled {
        return Err(GpioError::ControllerUnavailable {
            details: "disabled in configuration".to_string(),
        });
    }

    PinController::detect()
}

/// Log every door event for the audit trail
fn spawn_audit_log(event_bus: &EventBus, cancel: CancellationToken) {
    let mut receiver = event_bus.subscribe_filtered(EventFilter::All, "audit");
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(event) => info!(
                        target: "frontdoor::audit",
                        event_type = event.event_type(),
                        at = %event.timestamp(),
                        "{}",
                        event.description()
                    ),
                    Err(EventBusError::Lagged { skipped }) => {
                        warn!("Audit log skipped {} events", skipped)
                    }
                    Err(e) => {
                        debug!("Audit log stopped: {}", e);
                        break;
                    }
                },
            }
        }
    });
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("frontdoor={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# frontdoor configuration file");
    println!("# Every value can be overridden with FRONTDOOR_<SECTION>__<KEY>");
    println!();
    println!("{}", toml::to_string_pretty(&FrontdoorConfig::default())?);
    Ok(())
}
