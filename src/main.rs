use modembridge::config::BridgeConfig;
use modembridge::errors::BridgeResult;
use modembridge::pipeline::state::SupervisorState;
use modembridge::pipeline::supervisor::Bridge;
use modembridge::serial::SerialLine;

use tracing_subscriber::EnvFilter;

/// modembridge entry point
fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    // Load configuration (first argument overrides the default path)
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "bridge.conf".to_string());
    let config = match BridgeConfig::load_from_file(&config_path) {
        Ok(config) => {
            println!("Configuration loaded from {}", config_path);
            config
        }
        Err(e) => {
            eprintln!("Config error: {}. Using defaults.", e);
            BridgeConfig::default()
        }
    };

    // RUST_LOG wins over the config-file filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    print_startup_banner(&config);

    match run_bridge(config) {
        Ok(SupervisorState::Terminated) => {
            println!("> Bridge terminated normally");
            0
        }
        Ok(state) => {
            eprintln!("! Bridge stopped in state {}", state);
            1
        }
        Err(e) => {
            eprintln!("! Runtime error: {}", e);
            2
        }
    }
}

fn run_bridge(config: BridgeConfig) -> BridgeResult<SupervisorState> {
    let serial = SerialLine::open(&config.serial)?;
    let mut bridge = Bridge::new(config, serial)?;
    bridge.run()
}

/// Show startup information in the console log
fn print_startup_banner(config: &BridgeConfig) {
    println!("> modembridge {} starting", env!("CARGO_PKG_VERSION"));
    println!(
        "> Serial: {} @ {} ({}{}{}, flow {:?})",
        config.serial.device,
        config.serial.baud,
        config.serial.data_bits,
        match config.serial.parity {
            modembridge::config::Parity::None => "N",
            modembridge::config::Parity::Odd => "O",
            modembridge::config::Parity::Even => "E",
        },
        config.serial.stop_bits,
        config.serial.flow,
    );
    println!(
        "> Network: {}:{} (connect timeout {}s)",
        config.network.host,
        config.network.port,
        config.network.connect_timeout.as_secs()
    );
    println!(
        "> Scheduler: quantum {}ms, weights {}:{}",
        config.pipeline.quantum_ms, config.pipeline.serial_weight, config.pipeline.telnet_weight
    );
    match &config.modem.health_check {
        Some(cmd) => println!("> Modem health check: {}", cmd),
        None => println!("> Modem health check: Disabled"),
    }
    println!();
}
