// Shared `tracing` setup for both binaries.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Lets a full-screen frontend mute stderr logging while it owns the
/// terminal. Logging to a file is never muted.
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    directives: String,
    to_terminal: bool,
}

impl LogControl {
    pub fn pause(&self) -> Result<()> {
        if self.to_terminal {
            self.handle.reload(EnvFilter::new("off"))?;
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if self.to_terminal {
            self.handle.reload(parse_filter(&self.directives)?)?;
        }
        Ok(())
    }
}

/// Installs the global subscriber. `level` takes `EnvFilter` directives
/// such as `debug` or `snapd_installation_monitor=trace`.
pub fn init(level: &str, file: Option<&Path>) -> Result<LogControl> {
    let (writer, to_terminal) = match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let (subscriber, control) = build(level, writer, to_terminal)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the log subscriber")?;
    Ok(control)
}

fn build(
    level: &str,
    writer: BoxMakeWriter,
    to_terminal: bool,
) -> Result<(impl Subscriber + Send + Sync + 'static, LogControl)> {
    let (filter, handle) = reload::Layer::new(parse_filter(level)?);

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(false)
            .with_ansi(to_terminal)
            .with_writer(writer),
    );

    let control = LogControl {
        handle,
        directives: level.to_string(),
        to_terminal,
    };
    Ok((subscriber, control))
}

fn parse_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level {level:?}"))
}
