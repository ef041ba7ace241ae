// Handles the rendering of the notice and status line to the terminal frame.

use super::monitor::MonitorSession;
use super::sink::{Notice, TOOLTIP, TerminalSink};
use super::systemd::StateQuery;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use std::time::Instant;

/// Main render function called every frame.
pub fn render<Q: StateQuery>(
    f: &mut Frame,
    session: &MonitorSession<Q, TerminalSink>,
    now: Instant,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.area());

    render_status(f, chunks[0], session);
    render_footer(f, chunks[1]);

    if let Some(notice) = session.sink().current(now) {
        render_notice(f, notice);
    }
}

fn render_status<Q: StateQuery>(
    f: &mut Frame,
    area: Rect,
    session: &MonitorSession<Q, TerminalSink>,
) {
    let (symbol, color) = match session.last_state() {
        Some(state) if state.is_terminal() => ("●", Color::Green),
        Some(state) if state.is_failed() => ("✖", Color::Red),
        Some(_) => ("◌", Color::Yellow),
        None => ("○", Color::DarkGray),
    };

    let state = session
        .last_state()
        .map(|state| state.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{symbol} "), Style::default().fg(color)),
        Span::raw(format!("{:<40}", session.unit())),
        Span::styled(format!("[{state}]"), Style::default().fg(Color::Gray)),
    ])];

    if let Some(err) = session.last_error() {
        lines.push(Line::from(Span::styled(
            format!("last check failed ({}x): {err}", session.failure_streak()),
            Style::default().fg(Color::Red),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(format!(" {TOOLTIP} ")));

    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let help_text = Line::from(vec![
        Span::raw("Show notice: "),
        Span::styled("Enter/click ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("| Closes by itself when the unit finishes"),
    ]);

    let paragraph =
        Paragraph::new(help_text).block(Block::default().borders(Borders::ALL).title(" Controls "));

    f.render_widget(paragraph, area);
}

fn render_notice(f: &mut Frame, notice: &Notice) {
    let area = centered_rect(60, 30, f.area());

    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Span::styled(
            format!(" ℹ {} ", notice.title),
            Style::default().add_modifier(Modifier::BOLD),
        ));

    let paragraph = Paragraph::new(notice.body.as_str())
        .block(block)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::model::UnitState;
    use crate::app::monitor::MonitorConfig;
    use crate::app::systemd::QueryError;
    use ratatui::{Terminal, backend::TestBackend};

    struct Fixed(UnitState);

    impl StateQuery for Fixed {
        fn query(&mut self, _unit: &str) -> Result<UnitState, QueryError> {
            Ok(self.0.clone())
        }
    }

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn draws_notice_and_unit_state_while_watching() {
        let mut session = MonitorSession::new(
            MonitorConfig::default(),
            Fixed(UnitState::new("activating", "start")),
            TerminalSink::new(),
        );
        session.decide(Instant::now()).unwrap();

        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| render(f, &session, Instant::now())).unwrap();

        let text = screen_text(&terminal);
        assert!(text.contains("Installation Notice"));
        assert!(text.contains("snapd.seeded.service"));
        assert!(text.contains("[activating (start)]"));
    }

    #[test]
    fn centered_rect_stays_inside() {
        let outer = Rect::new(0, 0, 100, 100);
        let inner = centered_rect(60, 30, outer);
        assert_eq!(inner.width, 60);
        assert_eq!(inner.height, 30);
        assert!(inner.x >= outer.x && inner.right() <= outer.right());
    }
}
