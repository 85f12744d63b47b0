//! agent-presence: rich presence daemon for AI coding sessions
//!
//! Runs the daemon, or queries a running one over its loopback port.

use agent_presence::client::DaemonClient;
use agent_presence::clock::{Clock, SystemClock};
use agent_presence::config::{self, Config};
use agent_presence::server::Health;
use agent_presence::{Error, Session, SessionStatus, daemon};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "agent-presence", about = "Rich presence daemon for AI coding sessions")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the daemon in the foreground (default)
    Daemon,
    /// Show daemon health
    Status,
    /// List tracked sessions
    Sessions,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("AGENT_PRESENCE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
}

/// `12s`, `4m`, `1h 5m`
fn format_elapsed(ms: u64) -> String {
    let minutes = ms / 60_000;
    match minutes {
        0 => format!("{}s", ms / 1000),
        1..=59 => format!("{minutes}m"),
        _ if minutes % 60 == 0 => format!("{}h", minutes / 60),
        _ => format!("{}h {}m", minutes / 60, minutes % 60),
    }
}

fn print_status(config: &Config, health: &Health) {
    println!("Daemon:   running on port {}", config.daemon_port);
    if let Some(pid) = config::pid_file_path().and_then(|p| config::read_pid_file(&p)) {
        println!("PID:      {pid}");
    }
    println!(
        "Presence: {}",
        if health.connected { "connected" } else { "disconnected" }
    );
    println!("Sessions: {}", health.sessions);
    println!("Uptime:   {}", format_elapsed(health.uptime.saturating_mul(1000)));
    println!("Version:  {}", health.version);
}

fn print_sessions(sessions: &[Session], now: u64) {
    if sessions.is_empty() {
        println!("No active sessions");
        return;
    }
    for session in sessions {
        println!(
            "{:<24} {:<6} {:>8}  {}",
            session.project_name,
            match session.status {
                SessionStatus::Active => "active",
                SessionStatus::Idle => "idle",
            },
            format_elapsed(now.saturating_sub(session.started_at)),
            session.details
        );
    }
}

async fn query(config: &Config, command: Command) -> agent_presence::Result<()> {
    match command {
        Command::Daemon => daemon::run(config.clone()).await,
        Command::Status => {
            let health = DaemonClient::new(config.daemon_port).health().await?;
            print_status(config, &health);
            Ok(())
        }
        Command::Sessions => {
            let sessions = DaemonClient::new(config.daemon_port).sessions().await?;
            print_sessions(&sessions, SystemClock.now_ms());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::load_config();
    let command = cli.command.unwrap_or(Command::Daemon);
    let is_daemon = matches!(command, Command::Daemon);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(query(&config, command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Request(e)) if !is_daemon && e.is_connect() => {
            eprintln!("Daemon is not running on port {}", config.daemon_port);
            ExitCode::FAILURE
        }
        Err(Error::Status(code)) => {
            eprintln!(
                "Port {} is not answering like a daemon (HTTP {code})",
                config.daemon_port
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
