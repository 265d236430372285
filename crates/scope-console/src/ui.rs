use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame,
};
use scope_core::{parse_line, plan, BoundedStream, RenderPlan, Viewport};

use crate::state::{App, Mode, SwarmOutcome};
use crate::theme;

pub fn render(f: &mut Frame, app: &mut App) {
    let area = f.size();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, layout[0]);

    if app.help_open {
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(layout[1]);
        render_body(f, app, main[0]);
        render_help(f, main[1]);
    } else {
        render_body(f, app, layout[1]);
    }

    render_status_line(f, app, layout[2]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let status = app.status_label();
    let status_style = Style::default()
        .fg(theme::connection_color(app.connection))
        .add_modifier(Modifier::BOLD);

    let mut summary = vec![
        Span::styled("swarmscope ", theme::HEADER_STYLE),
        Span::styled(format!("[{status}] "), status_style),
        Span::styled(
            format!("session {} ", app.session_id),
            Style::default().fg(theme::MUTED),
        ),
        Span::raw(format!(
            "agents {}  events {}  ",
            app.agents.len(),
            app.frames_received
        )),
    ];
    if app.gaps_detected > 0 {
        summary.push(Span::styled(
            format!("gaps {}  ", app.gaps_detected),
            Style::default().fg(theme::WARN),
        ));
    }
    if let Some(outcome) = &app.outcome {
        let (label, color) = match outcome {
            SwarmOutcome::Complete => ("complete".to_string(), theme::OK),
            SwarmOutcome::Failed(error) => (format!("failed: {error}"), theme::CRITICAL),
        };
        summary.push(Span::styled(label, Style::default().fg(color)));
    }

    let tabs: Vec<Span> = [Mode::Agents, Mode::Activity, Mode::Output]
        .iter()
        .enumerate()
        .flat_map(|(i, mode)| {
            let style = if *mode == app.mode {
                Style::default()
                    .fg(theme::ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme::MUTED)
            };
            [Span::styled(
                format!("[{}] {}", i + 1, mode.title()),
                style,
            )]
            .into_iter()
            .chain(std::iter::once(Span::raw("  ")))
        })
        .collect();

    let header = Paragraph::new(vec![Line::from(summary), Line::from(tabs)]).block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(theme::BORDER)),
    );
    f.render_widget(header, area);
}

fn render_body(f: &mut Frame, app: &mut App, area: Rect) {
    match app.mode {
        Mode::Agents => render_agents(f, app, area),
        Mode::Activity => {
            let viewport = app.activity_viewport;
            let (widget, viewport) = log_pane(&app.activity, viewport, area, "Activity");
            app.activity_viewport = viewport;
            f.render_widget(widget, area);
        }
        Mode::Output => {
            let viewport = app.output_viewport;
            let (widget, viewport) = log_pane(&app.output, viewport, area, "Output");
            app.output_viewport = viewport;
            f.render_widget(widget, area);
        }
    }
}

fn render_agents(f: &mut Frame, app: &mut App, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(24), Constraint::Min(0)])
        .split(area);

    let selected = app.selected_agent_name().map(str::to_string);
    let items: Vec<ListItem> = app
        .agents
        .values()
        .map(|view| {
            let mut spans = vec![Span::raw(view.name.clone())];
            if view.breaker_open {
                spans.push(Span::styled(" !", Style::default().fg(theme::CRITICAL)));
            }
            let item = ListItem::new(Line::from(spans));
            if Some(view.name.as_str()) == selected.as_deref() {
                item.style(theme::SELECTED_STYLE)
            } else {
                item
            }
        })
        .collect();
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Agents")
            .border_style(Style::default().fg(theme::BORDER)),
    );
    f.render_widget(list, columns[0]);

    match selected.and_then(|name| app.agents.get_mut(&name)) {
        Some(view) => {
            let title = format!("Log: {}", view.name);
            let (widget, viewport) = log_pane(&view.logs, view.viewport, columns[1], &title);
            view.viewport = viewport;
            f.render_widget(widget, columns[1]);
        }
        None => {
            let block = Block::default()
                .borders(Borders::ALL)
                .title("Log")
                .border_style(Style::default().fg(theme::BORDER));
            let inner = block.inner(columns[1]);
            f.render_widget(block, columns[1]);
            let p = Paragraph::new("No agents yet. Waiting for swarm output.")
                .style(Style::default().fg(theme::MUTED))
                .wrap(Wrap { trim: true });
            f.render_widget(p, inner);
        }
    }
}

/// Builds a scrollable log widget, materializing only the rows the plan
/// calls for. Returns the viewport revalidated against the pane height.
fn log_pane(
    stream: &BoundedStream,
    mut viewport: Viewport,
    area: Rect,
    title: &str,
) -> (Paragraph<'static>, Viewport) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title.to_string())
        .border_style(Style::default().fg(theme::BORDER));
    let inner_height = block.inner(area).height as usize;
    viewport.resize(inner_height, stream.len());

    let render_plan = plan(stream.len(), &viewport);
    let range = render_plan.range();
    let lines: Vec<Line> = stream
        .iter()
        .skip(range.start)
        .take(range.len())
        .map(|entry| ansi_line(&entry.text))
        .collect();

    // The widget holds only the materialized band, so scroll within it.
    let skip = match render_plan {
        RenderPlan::Full { .. } => viewport.scroll_offset,
        RenderPlan::Windowed { .. } => viewport.scroll_offset.saturating_sub(range.start),
    };
    let widget = Paragraph::new(lines)
        .block(block)
        .scroll((skip as u16, 0));
    (widget, viewport)
}

/// Interprets SGR escapes in a raw log line as span styles.
fn ansi_line(raw: &str) -> Line<'static> {
    let spans = parse_line(raw)
        .into_iter()
        .map(|segment| Span::styled(segment.text, theme::sgr_style(segment.style)))
        .collect::<Vec<_>>();
    Line::from(spans)
}

fn render_status_line(f: &mut Frame, app: &App, area: Rect) {
    if app.input_active {
        let line = Line::from(vec![
            Span::styled("send> ", Style::default().fg(theme::ACCENT)),
            Span::raw(app.input_buffer.clone()),
            Span::styled("_", Style::default().fg(theme::MUTED)),
        ]);
        f.render_widget(Paragraph::new(line), area);
        return;
    }
    let line = match &app.status_note {
        Some(notice) => Line::from(Span::styled(
            notice.message.clone(),
            Style::default().fg(theme::severity_color(notice.severity)),
        )),
        None => Line::from(Span::styled(
            "Tab switch view  j/k scroll  n/p agent  i send  r poll  ? help  q quit",
            Style::default().fg(theme::MUTED),
        )),
    };
    f.render_widget(Paragraph::new(line), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let entries = [
        ("Tab", "Next view"),
        ("1 / 2 / 3", "Agents / Activity / Output"),
        ("j / Down", "Scroll down"),
        ("k / Up", "Scroll up"),
        ("PgDn / PgUp", "Scroll by page"),
        ("g / G", "Jump to top / bottom"),
        ("n / p", "Next / previous agent"),
        ("i", "Send input to the swarm"),
        ("r", "Poll the swarm log now"),
        ("?", "Toggle help"),
        ("q / Esc", "Quit"),
    ];
    let mut text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    for (keys, action) in entries {
        text.push(Line::from(vec![
            Span::styled(format!("{keys:<12}"), Style::default().fg(Color::Cyan)),
            Span::raw(action),
        ]));
    }
    text.push(Line::from(""));
    text.push(Line::from(Span::styled(
        "Press any key to close.",
        Style::default().fg(theme::MUTED),
    )));

    let p = Paragraph::new(text).wrap(Wrap { trim: true });
    f.render_widget(p, inner);
}

#[cfg(test)]
mod tests {
    use ratatui::{backend::TestBackend, Terminal};
    use scope_core::{AnsiColor, EventFrame, SwarmEvent};

    use super::*;

    fn log_frame(seq: u64, agent: &str) -> EventFrame {
        EventFrame::new(
            seq,
            SwarmEvent::Log {
                agent: agent.to_string(),
                lines: vec!["hi".to_string()],
            },
        )
    }

    #[test]
    fn selected_agent_row_is_highlighted() {
        let mut app = App::new("s", true);
        app.apply_frame(&log_frame(1, "alpha"));
        app.apply_frame(&log_frame(2, "beta"));

        let backend = TestBackend::new(80, 24);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|f| render(f, &mut app)).unwrap();

        // Header is 3 rows, the list block border 1 more, so the first
        // agent row lands at y = 4 inside the left column.
        let buffer = terminal.backend().buffer();
        assert_eq!(buffer.get(1, 4).symbol(), "a");
        assert_eq!(buffer.get(1, 4).bg, theme::SELECTED_STYLE.bg.unwrap());
        assert_eq!(buffer.get(1, 5).symbol(), "b");
        assert_ne!(buffer.get(1, 5).bg, theme::SELECTED_STYLE.bg.unwrap());
    }

    #[test]
    fn ansi_line_carries_segment_styles() {
        let line = ansi_line("\u{1b}[31mError\u{1b}[0m ok");
        assert_eq!(line.spans.len(), 2);
        assert_eq!(line.spans[0].content.as_ref(), "Error");
        assert_eq!(line.spans[0].style.fg, Some(Color::Indexed(1)));
        assert_eq!(line.spans[1].content.as_ref(), " ok");
        assert_eq!(line.spans[1].style.fg, None);
    }

    #[test]
    fn ansi_line_passes_plain_text_through() {
        let line = ansi_line("plain");
        assert_eq!(line.spans.len(), 1);
        assert_eq!(line.spans[0].content.as_ref(), "plain");
        assert_eq!(line.spans[0].style, Style::default());
    }

    #[test]
    fn rgb_colors_survive_the_span_mapping() {
        let style = theme::sgr_style(scope_core::TextStyle {
            fg: AnsiColor::Rgb(10, 20, 30),
            ..Default::default()
        });
        assert_eq!(style.fg, Some(Color::Rgb(10, 20, 30)));
    }
}
