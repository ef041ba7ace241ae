// Notification sinks: where the "please wait" notice is shown and cleared.

use crossbeam_channel::Sender;
use ksni::blocking::{Handle, TrayMethods};
use notify_rust::{Notification, NotificationHandle, Timeout};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const TOOLTIP: &str = "Snap Installation Monitor";
const TRAY_ID: &str = "snapd-installation-monitor";
const ICON: &str = "dialog-information";

/// A notice as handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
    /// How long the host should keep the notice on screen.
    pub duration: Duration,
}

impl Notice {
    /// The fixed message shown while snaps are being seeded.
    pub fn installation() -> Self {
        Self {
            title: "Installation Notice".to_string(),
            body: "Finalizing installation of snaps, please wait...".to_string(),
            duration: Duration::from_millis(15000),
        }
    }
}

/// Why the user poked the notification affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationReason {
    Unknown,
    /// Context menu request.
    Context,
    DoubleClick,
    /// Primary click.
    Trigger,
    MiddleClick,
}

/// Presentation side of the monitor. Both operations are idempotent and
/// never fail from the caller's point of view.
pub trait NotificationSink {
    fn show(&mut self, notice: &Notice);
    fn clear(&mut self);
}

/// Presentation state for the terminal frontend. Drawing happens in `ui`.
#[derive(Debug, Default)]
pub struct TerminalSink {
    notice: Option<Notice>,
    shown_at: Option<Instant>,
    shown_count: usize,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.notice.is_some()
    }

    pub fn shown_count(&self) -> usize {
        self.shown_count
    }

    /// The notice to draw at `now`, if its duration hint has not run out.
    /// The tray presence itself stays until `clear`.
    pub fn current(&self, now: Instant) -> Option<&Notice> {
        let notice = self.notice.as_ref()?;
        let shown_at = self.shown_at?;
        (now.saturating_duration_since(shown_at) < notice.duration).then_some(notice)
    }
}

impl NotificationSink for TerminalSink {
    fn show(&mut self, notice: &Notice) {
        self.notice = Some(notice.clone());
        self.shown_at = Some(Instant::now());
        self.shown_count += 1;
    }

    fn clear(&mut self) {
        self.notice = None;
        self.shown_at = None;
    }
}

/// Desktop notifications through the freedesktop notification service.
#[derive(Default)]
pub struct DesktopSink {
    handle: Option<NotificationHandle>,
}

impl DesktopSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSink for DesktopSink {
    fn show(&mut self, notice: &Notice) {
        self.clear();

        debug!(title = %notice.title, "showing desktop notification");

        let timeout = u32::try_from(notice.duration.as_millis()).unwrap_or(u32::MAX);
        match Notification::new()
            .appname(TOOLTIP)
            .summary(&notice.title)
            .body(&notice.body)
            .icon(ICON)
            .timeout(Timeout::Milliseconds(timeout))
            .show()
        {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => warn!("Failed to show notification: {e}"),
        }
    }

    fn clear(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("closing desktop notification");
            handle.close();
        }
    }
}

/// Tray item for the desktop frontend. It runs on ksni's own thread, so
/// clicks are only forwarded; the session thread acts on them.
pub struct StatusTray {
    activations: Sender<ActivationReason>,
}

impl StatusTray {
    pub fn new(activations: Sender<ActivationReason>) -> Self {
        Self { activations }
    }

    fn forward(&self, reason: ActivationReason) {
        if self.activations.send(reason).is_err() {
            debug!(?reason, "monitor is gone, dropping tray activation");
        }
    }
}

impl ksni::Tray for StatusTray {
    fn id(&self) -> String {
        TRAY_ID.to_string()
    }

    fn title(&self) -> String {
        TOOLTIP.to_string()
    }

    fn icon_name(&self) -> String {
        ICON.to_string()
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        ksni::ToolTip {
            icon_name: ICON.to_string(),
            title: TOOLTIP.to_string(),
            ..Default::default()
        }
    }

    fn activate(&mut self, _x: i32, _y: i32) {
        self.forward(ActivationReason::Trigger);
    }

    fn secondary_activate(&mut self, _x: i32, _y: i32) {
        self.forward(ActivationReason::MiddleClick);
    }
}

/// Tray icon plus desktop notifications. The tray appears with the first
/// `show` and is torn down by `clear`.
pub struct TraySink {
    activations: Sender<ActivationReason>,
    tray: Option<Handle<StatusTray>>,
    toast: DesktopSink,
}

impl TraySink {
    pub fn new(activations: Sender<ActivationReason>) -> Self {
        Self {
            activations,
            tray: None,
            toast: DesktopSink::new(),
        }
    }

    pub fn has_tray(&self) -> bool {
        self.tray.is_some()
    }
}

impl NotificationSink for TraySink {
    fn show(&mut self, notice: &Notice) {
        if self.tray.is_none() {
            match StatusTray::new(self.activations.clone()).spawn() {
                Ok(handle) => self.tray = Some(handle),
                Err(e) => warn!("Failed to create tray icon: {e}"),
            }
        }
        self.toast.show(notice);
    }

    fn clear(&mut self) {
        self.toast.clear();
        if let Some(handle) = self.tray.take() {
            debug!("removing tray icon");
            handle.shutdown().wait();
        }
    }
}
