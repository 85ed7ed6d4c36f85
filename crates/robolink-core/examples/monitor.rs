//! Robot Controller Monitor
//!
//! Connects to a robot controller, prints every state frame as JSON with a
//! timestamp, forwards device log output, and optionally sends commands.
//!
//! Usage:
//!   cargo run --example monitor -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyACM0)
//!   --demo            Talk to the built-in simulated robot instead
//!   --config FILE     Load connection settings from a JSON file
//!   --seconds N       How long to stay connected (default: 10)
//!   --send LETTERS    Commands to send once streaming, e.g. "SP"
//!
//! Set RUST_LOG=debug for link-level diagnostics.

use anyhow::{bail, Context};
use robolink_core::demo::DemoOpener;
use robolink_core::protocol::{Command, ConnectionConfig, ConnectionManager, RobotState};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("Usage: monitor [OPTIONS] [PORT]");
    println!();
    println!("  --port, -p PORT       Serial port (default: /dev/ttyACM0)");
    println!("  --demo                Use the simulated robot");
    println!("  --config, -c FILE     Load connection settings from JSON");
    println!("  --seconds, -s N       Stay connected for N seconds (default: 10)");
    println!("  --send LETTERS        Commands to send once streaming");
}

fn print_state(state: RobotState) {
    let now = chrono::Local::now().format("%H:%M:%S%.3f");
    match serde_json::to_string(&state) {
        Ok(json) => println!("{} state {}", now, json),
        Err(e) => eprintln!("{} could not encode state {}: {}", now, state, e),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name = "/dev/ttyACM0".to_string();
    let mut demo = false;
    let mut config_path: Option<String> = None;
    let mut seconds = 10u64;
    let mut to_send = String::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                port_name = args.get(i).context("--port needs a value")?.clone();
            }
            "--demo" => {
                demo = true;
            }
            "--config" | "-c" => {
                i += 1;
                config_path = Some(args.get(i).context("--config needs a value")?.clone());
            }
            "--seconds" | "-s" => {
                i += 1;
                let raw = args.get(i).context("--seconds needs a value")?;
                seconds = raw
                    .parse()
                    .with_context(|| format!("invalid --seconds value {:?}", raw))?;
            }
            "--send" => {
                i += 1;
                to_send = args.get(i).context("--send needs a value")?.clone();
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                port_name = arg.to_string();
            }
            other => bail!("Unknown option: {}", other),
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => ConnectionConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => ConnectionConfig::default(),
    };
    let settle = config.settle_delay();

    let mut conn = if demo {
        ConnectionManager::with_opener(config, DemoOpener::new())
    } else {
        ConnectionManager::new(config)
    };

    if let Err(e) = conn.connect(&port_name, print_state) {
        if e.is_open_failure() {
            eprintln!("Check the port name and permissions, or pass --demo to use the simulator");
        }
        bail!("could not connect to {}: {}", port_name, e);
    }

    // Commands sent before the streaming handshake would race the board's boot
    std::thread::sleep(settle + Duration::from_millis(100));
    for letter in to_send.chars() {
        let named = u8::try_from(letter).ok().and_then(Command::from_byte);
        if let Some(cmd) = named.filter(|c| c.requires_manual_mode()) {
            println!("note: {:?} only moves the robot in manual mode (send M first)", cmd);
        }
        conn.send_command(&letter.to_string());
        std::thread::sleep(Duration::from_millis(250));
    }

    std::thread::sleep(Duration::from_secs(seconds));
    conn.close(true);

    let stats = conn.stats();
    println!(
        "lines={} states={} dropped={} malformed={} read_errors={} commands={}",
        stats.lines_received,
        stats.states_dispatched,
        stats.dropped_states,
        stats.malformed_frames,
        stats.read_errors,
        stats.commands_sent
    );
    Ok(())
}
