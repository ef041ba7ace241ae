// Entry point: connects to systemd, picks a frontend and runs the monitor.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use snapd_installation_monitor::app::App;
use snapd_installation_monitor::app::monitor::{
    Completion, DEFAULT_UNIT, MonitorConfig, MonitorSession, Phase,
};
use snapd_installation_monitor::app::sink::{TerminalSink, TraySink};
use snapd_installation_monitor::app::systemd::SystemdQuery;
use snapd_installation_monitor::logging::{self, LogControl};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Frontend {
    /// Full-screen terminal view; Enter or a click re-shows the notice.
    Terminal,
    /// Tray icon and desktop notifications; clicking the icon re-shows the notice.
    Desktop,
}

/// Shows a notice while snapd finishes seeding and exits once it is done
#[derive(Parser, Debug)]
#[command(name = "snapd-installation-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Unit to watch
    #[arg(long, default_value = DEFAULT_UNIT)]
    unit: String,

    /// Milliseconds between state checks
    #[arg(
        long = "interval-ms",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval_ms: u64,

    #[arg(long, value_enum, default_value_t = Frontend::Terminal)]
    frontend: Frontend,

    /// Ask the per-user service manager instead of the system one
    #[arg(long)]
    session_bus: bool,

    /// Log filter directives, e.g. "debug"
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs here instead of stderr. Stderr logging is muted while the
    /// terminal view is on screen
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let logs = logging::init(&cli.log_level, cli.log_file.as_deref())?;

    let config = MonitorConfig {
        unit: cli.unit,
        poll_interval: Duration::from_millis(cli.interval_ms),
    };

    let query = if cli.session_bus {
        SystemdQuery::session()
    } else {
        SystemdQuery::system()
    }
    .context("Failed to connect to the service manager")?;

    let completion = match cli.frontend {
        Frontend::Terminal => {
            let mut app = App::new(MonitorSession::new(config, query, TerminalSink::new()));
            if let Phase::Terminated(completion) = app.start()? {
                completion
            } else {
                run_terminal(&mut app, &logs)?
            }
        }
        Frontend::Desktop => {
            let (activations_tx, activations) = crossbeam_channel::unbounded();
            let sink = TraySink::new(activations_tx);
            let mut app = App::new(MonitorSession::new(config, query, sink));
            app.start()?;
            app.run_headless(&activations)?
        }
    };

    match completion {
        Completion::AlreadyComplete => info!("unit already finished, nothing to show"),
        Completion::Completed => info!("unit finished, notice cleared"),
    }
    Ok(())
}

fn run_terminal(
    app: &mut App<SystemdQuery, TerminalSink>,
    logs: &LogControl,
) -> Result<Completion> {
    logs.pause()?;
    let mut terminal = ratatui::try_init().context("Failed to set up the terminal")?;
    execute!(std::io::stdout(), EnableMouseCapture)?;

    let result = app.run_terminal(&mut terminal);

    let _ = execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();
    logs.resume()?;
    result
}
