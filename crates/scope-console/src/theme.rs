use ratatui::style::{Color, Modifier, Style};
use scope_core::{AnsiColor, NoticeSeverity, TextStyle};
use scope_sync::ConnectionState;

pub const BORDER: Color = Color::Rgb(71, 85, 105);
pub const MUTED: Color = Color::Rgb(148, 163, 184);
pub const ACCENT: Color = Color::Rgb(56, 189, 248);
pub const OK: Color = Color::Rgb(34, 197, 94);
pub const WARN: Color = Color::Rgb(245, 158, 11);
pub const CRITICAL: Color = Color::Rgb(239, 68, 68);

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(191, 219, 254))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(ACCENT)
    .fg(Color::Rgb(11, 18, 32))
    .add_modifier(Modifier::BOLD);

pub fn connection_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Open => OK,
        ConnectionState::Connecting => ACCENT,
        ConnectionState::Reconnecting => WARN,
        ConnectionState::Closed => MUTED,
    }
}

pub fn severity_color(severity: NoticeSeverity) -> Color {
    match severity {
        NoticeSeverity::Info => ACCENT,
        NoticeSeverity::Warn => WARN,
        NoticeSeverity::Error => CRITICAL,
    }
}

/// Maps an interpreted SGR style onto a ratatui style. Indexed colors use
/// the terminal palette so themes stay in charge of the exact shade.
pub fn sgr_style(style: TextStyle) -> Style {
    let mut out = Style::default();
    if let Some(color) = sgr_color(style.fg) {
        out = out.fg(color);
    }
    if let Some(color) = sgr_color(style.bg) {
        out = out.bg(color);
    }
    if style.bold {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.dim {
        out = out.add_modifier(Modifier::DIM);
    }
    if style.italic {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.underline {
        out = out.add_modifier(Modifier::UNDERLINED);
    }
    if style.inverse {
        out = out.add_modifier(Modifier::REVERSED);
    }
    out
}

fn sgr_color(color: AnsiColor) -> Option<Color> {
    match color {
        AnsiColor::Default => None,
        AnsiColor::Indexed(index) => Some(Color::Indexed(index)),
        AnsiColor::Rgb(r, g, b) => Some(Color::Rgb(r, g, b)),
    }
}
