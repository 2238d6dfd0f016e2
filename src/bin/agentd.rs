//! The agent's binary entry point.
//!
//! Command-line parsing, daemonisation and service-control wiring are left
//! to the deployment layer; this binary only reads the handful of
//! environment variables needed to open the serial port and construct a
//! [`serclient_agent::Watcher`], then runs it until killed.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serclient_agent::{AgentConfig, AgentContext, Watcher};

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn env_u32_or(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn build_config() -> AgentConfig {
    let port_path = env::var("SERCLIENT_PORT").expect("SERCLIENT_PORT must name the serial device");
    let root_dir: PathBuf = env_or("SERCLIENT_ROOT", ".").into();

    let mut config = AgentConfig::new(port_path, root_dir);
    config.baud_rate = env_u32_or("SERCLIENT_BAUD_RATE", config.baud_rate);
    config.command_timeout = Duration::from_secs(env_u32_or("SERCLIENT_COMMAND_TIMEOUT_SECS", 20) as u64);
    config
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = build_config();
    let context = AgentContext::new(&config);

    let transport = match serclient_agent::transport::SerialPortTransport::open(&config) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, port = %config.port_path, "failed to open serial port");
            std::process::exit(1);
        }
    };

    tracing::info!(port = %config.port_path, baud = config.baud_rate, "serclient-agent starting");

    let mut watcher = Watcher::new(transport, context);
    let stop_flag = AtomicBool::new(false);
    watcher.run(&stop_flag);
}
