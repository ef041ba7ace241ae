// The central application controller and event loops.

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, MouseButton, MouseEventKind};
use ratatui::{Terminal, backend::Backend};
use std::time::Instant;
use tracing::info;

pub mod model;
pub mod monitor;
pub mod sink;
pub mod systemd;
pub mod ui;

use monitor::{Completion, MonitorSession, Phase};
use sink::{ActivationReason, NotificationSink, TerminalSink};
use systemd::StateQuery;

pub struct App<Q, S> {
    session: MonitorSession<Q, S>,
}

impl<Q: StateQuery, S: NotificationSink> App<Q, S> {
    pub fn new(session: MonitorSession<Q, S>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &MonitorSession<Q, S> {
        &self.session
    }

    /// Takes the initial snapshot. Callers should skip any UI setup when
    /// this already reports `Terminated`.
    pub fn start(&mut self) -> Result<Phase> {
        let unit = self.session.unit().to_string();
        self.session
            .decide(Instant::now())
            .with_context(|| format!("Failed to read the state of {unit}"))
    }

    /// Polls without a terminal. Activations from other threads (the tray)
    /// arrive on `activations` and are applied here, between deadlines.
    pub fn run_headless(
        &mut self,
        activations: &Receiver<ActivationReason>,
    ) -> Result<Completion> {
        let mut source_open = true;
        loop {
            if let Phase::Terminated(completion) = self.session.phase() {
                info!(?completion, "monitor finished");
                return Ok(completion);
            }
            let Some(deadline) = self.session.next_deadline() else {
                bail!("monitor is not watching; call start() first");
            };

            let timeout = deadline.saturating_duration_since(Instant::now());
            if source_open {
                match activations.recv_timeout(timeout) {
                    Ok(reason) => self.session.activate(reason),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => source_open = false,
                }
            } else {
                std::thread::sleep(timeout);
            }

            self.session.advance(Instant::now());
        }
    }
}

impl<Q: StateQuery> App<Q, TerminalSink> {
    pub fn run_terminal<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<Completion> {
        loop {
            if let Phase::Terminated(completion) = self.session.phase() {
                info!(?completion, "monitor finished");
                return Ok(completion);
            }
            let Some(deadline) = self.session.next_deadline() else {
                bail!("monitor is not watching; call start() first");
            };

            terminal.draw(|f| ui::render(f, &self.session, Instant::now()))?;

            let timeout = deadline.saturating_duration_since(Instant::now());

            if event::poll(timeout)? {
                if let Some(reason) = activation_for(&event::read()?) {
                    self.session.activate(reason);
                }
            }

            self.session.advance(Instant::now());
        }
    }
}

/// Maps terminal input onto the activation reasons a tray icon would report.
pub fn activation_for(event: &Event) -> Option<ActivationReason> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
            KeyCode::Enter | KeyCode::Char(' ') => Some(ActivationReason::Trigger),
            KeyCode::Tab | KeyCode::Menu => Some(ActivationReason::Context),
            _ => None,
        },
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => Some(ActivationReason::Trigger),
            MouseEventKind::Down(MouseButton::Right) => Some(ActivationReason::Context),
            MouseEventKind::Down(MouseButton::Middle) => Some(ActivationReason::MiddleClick),
            _ => None,
        },
        _ => None,
    }
}
