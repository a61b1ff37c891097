use crate::annotate::{Sentiment, segments};
use crate::app::{App, AppState, Tab};
use crate::auth::AuthState;
use crate::gateway::{ChatRole, IndexQuote};
use crate::session::NoticeLevel;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Tabs, Wrap},
};

pub fn render(f: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_header(f, app, layout[0]);
    render_index_strip(f, app, layout[1]);
    match app.tab {
        Tab::Analysis => render_analysis(f, app, layout[2]),
        Tab::Chat => render_chat(f, app, layout[2]),
    }
    render_footer(f, app, layout[3]);

    if app.state != AppState::Normal {
        render_input_modal(f, app);
    } else if app.view.auth_prompt {
        render_auth_prompt(f);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(24)])
        .split(area);

    let (auth_label, auth_color) = match app.view.auth {
        AuthState::Authorized => ("KEY OK", Color::Green),
        AuthState::Unauthorized => ("NO KEY", Color::Red),
        AuthState::Unknown => ("CHECKING", Color::Yellow),
    };

    let mut spans = vec![
        Span::styled(" ChartLens ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(auth_label, Style::default().fg(auth_color).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(
            app.view.symbol.clone(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
    ];
    for (idx, symbol) in app.view.quick_symbols.iter().enumerate().take(9) {
        let style = if *symbol == app.view.symbol {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(format!("{}:{} ", idx + 1, symbol), style));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, chunks[0]);

    let titles = vec![Line::from(" Analysis "), Line::from(" Chat ")];
    let selected: usize = match app.tab {
        Tab::Analysis => 0,
        Tab::Chat => 1,
    };
    let tabs = Tabs::new(titles)
        .select(selected)
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(tabs, chunks[1]);
}

fn render_index_strip(f: &mut Frame, app: &App, area: Rect) {
    let board = &app.view.indices;
    let mut spans: Vec<Span> = Vec::new();
    if board.quotes.is_empty() {
        let msg = if board.loading { "Loading indices..." } else { "No index data yet (r to refresh)" };
        spans.push(Span::styled(msg, Style::default().fg(Color::DarkGray)));
    } else {
        for quote in &board.quotes {
            spans.extend(quote_spans(quote));
            spans.push(Span::raw("   "));
        }
        if board.loading {
            spans.push(Span::styled("↻", Style::default().fg(Color::DarkGray)));
        }
    }

    let title = match &board.updated_at {
        Some(ts) => format!(" Indices @ {} ", short_time(ts)),
        None => " Indices ".to_string(),
    };
    let strip = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(strip, area);
}

fn quote_spans(quote: &IndexQuote) -> Vec<Span<'static>> {
    let color = if quote.is_up() { Color::Green } else { Color::Red };
    vec![
        Span::styled(format!("{} ", quote.name), Style::default().fg(Color::White)),
        Span::styled(format!("{:+.2} ({})", quote.change, quote.percent), Style::default().fg(color)),
    ]
}

fn render_analysis(f: &mut Frame, app: &App, area: Rect) {
    let analysis = &app.view.analysis;

    if analysis.analyzing {
        let symbol = analysis.symbol.as_deref().unwrap_or(&app.view.symbol);
        render_loading(f, &format!("Analyzing {} chart...", symbol), area);
        return;
    }

    let Some(result) = &analysis.result else {
        let (msg, color) = match &analysis.error {
            Some(err) => (format!("Analysis failed: {}", err), Color::Red),
            None => ("Press o and enter a chart screenshot path to start.".to_string(), Color::Gray),
        };
        let body = Paragraph::new(msg)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title(" Analysis "));
        f.render_widget(body, area);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0)])
        .split(area);

    let title = format!(" {} | Summary ", analysis.symbol.as_deref().unwrap_or("-"));
    let summary = Paragraph::new(annotated_lines(&result.summary))
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(summary, chunks[0]);

    let report = Paragraph::new(annotated_lines(&result.analysis))
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0))
        .block(Block::default().borders(Borders::ALL).title(" Report "));
    f.render_widget(report, chunks[1]);
}

fn render_chat(f: &mut Frame, app: &App, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    for msg in &app.view.chat {
        let (who, color) = match msg.role {
            ChatRole::User => ("You", Color::Yellow),
            ChatRole::Model => ("AI", Color::Cyan),
        };
        lines.push(Line::from(Span::styled(
            format!("{}:", who),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )));
        lines.extend(annotated_lines(&msg.text));
        lines.push(Line::from(""));
    }
    if app.view.chat_loading {
        lines.push(Line::from(Span::styled("AI is typing...", Style::default().fg(Color::DarkGray))));
    }

    let visible = area.height.saturating_sub(2) as usize;
    let rows = wrapped_rows(&lines, area.width.saturating_sub(2));
    let auto_scroll = u16::try_from(rows.saturating_sub(visible)).unwrap_or(u16::MAX);
    let chat = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((auto_scroll.saturating_sub(app.scroll), 0))
        .block(Block::default().borders(Borders::ALL).title(format!(" Chat | {} ", app.view.symbol)));
    f.render_widget(chat, area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = match app.state {
        AppState::Normal => "s: symbol | o: open chart | i: ask | Tab: switch | r: refresh | x: clear | k: key | q: quit",
        _ => "Enter: submit | Esc: cancel",
    };

    let mut spans = vec![
        Span::styled(" Controls: ", Style::default().fg(Color::Gray)),
        Span::styled(hint, Style::default().fg(Color::White)),
    ];
    if let Some(notice) = app.notices.back() {
        let color = match notice.level {
            NoticeLevel::Info => Color::Green,
            NoticeLevel::Error => Color::Red,
        };
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(notice.message.clone(), Style::default().fg(color)));
    }

    let footer = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}

fn render_loading(f: &mut Frame, msg: &str, area: Rect) {
    let text = Paragraph::new(msg)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(text, area);
}

fn render_input_modal(f: &mut Frame, app: &App) {
    let title = match app.state {
        AppState::SymbolInput => " Symbol ",
        AppState::ImagePathInput => " Chart screenshot path ",
        AppState::ChatInput => " Ask about the chart ",
        AppState::KeyInput => " Gemini API key ",
        AppState::Normal => return,
    };
    let shown = if app.state == AppState::KeyInput {
        "*".repeat(app.input.chars().count())
    } else {
        app.input.clone()
    };

    let area = centered_rect(60, 3, f.area());
    let input = Paragraph::new(format!("{}_", shown))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(Clear, area);
    f.render_widget(input, area);
}

fn render_auth_prompt(f: &mut Frame) {
    let area = centered_rect(60, 6, f.area());
    let text = vec![
        Line::from(Span::styled(
            "API key required",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Press k to enter a Gemini API key,"),
        Line::from("or set GEMINI_API_KEY and restart. Esc hides this."),
    ];
    let prompt = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(" Activate "));
    f.render_widget(Clear, area);
    f.render_widget(prompt, area);
}

/// Rows the lines occupy once wrapped to `width` columns.
fn wrapped_rows(lines: &[Line], width: u16) -> usize {
    let width = usize::from(width.max(1));
    lines.iter().map(|line| line.width().div_ceil(width).max(1)).sum()
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = (u32::from(area.width) * u32::from(percent_x.min(100)) / 100) as u16;
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height: height.min(area.height),
    }
}

fn short_time(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|ts| ts.format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| rfc3339.to_string())
}

fn sentiment_style(sentiment: Sentiment) -> Style {
    let color = match sentiment {
        Sentiment::Buy => Color::Green,
        Sentiment::Sell => Color::Red,
        Sentiment::Wait => Color::Yellow,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

/// Terminal rendering of annotated markdown: headings are emphasized,
/// bold markers dropped, highlight spans colored.
pub fn annotated_lines(text: &str) -> Vec<Line<'static>> {
    text.lines()
        .map(|raw| {
            let trimmed = raw.trim_start();
            let (body, heading) = match trimmed.strip_prefix('#') {
                Some(_) => (trimmed.trim_start_matches('#').trim_start(), true),
                None => (raw, false),
            };
            let base = if heading {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let spans: Vec<Span<'static>> = segments(&body.replace("**", ""))
                .into_iter()
                .map(|(sentiment, run)| match sentiment {
                    Some(s) => Span::styled(run, sentiment_style(s)),
                    None => Span::styled(run, base),
                })
                .collect();
            Line::from(spans)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::highlight_keywords;

    #[test]
    fn test_annotated_lines_color_terms() {
        let lines = annotated_lines(&highlight_keywords("## 結論\n建議**買入**"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].spans[0].content, "結論");
        assert_eq!(lines[0].spans[0].style.fg, Some(Color::Cyan));

        let second = &lines[1].spans;
        assert_eq!(second[0].content, "建議");
        assert_eq!(second[1].content, "買入");
        assert_eq!(second[1].style.fg, Some(Color::Green));
    }

    #[test]
    fn test_centered_rect_fits_small_areas() {
        let area = Rect { x: 0, y: 0, width: 10, height: 2 };
        let rect = centered_rect(60, 3, area);
        assert_eq!(rect.width, 6);
        assert_eq!(rect.height, 2);
    }

    #[test]
    fn test_centered_rect_on_very_wide_terminal() {
        let area = Rect { x: 0, y: 0, width: 2000, height: 50 };
        let rect = centered_rect(60, 3, area);
        assert_eq!(rect.width, 1200);
        assert_eq!(rect.x, 400);
    }

    #[test]
    fn test_wrapped_rows_count_long_lines() {
        let lines = vec![Line::from("a".repeat(25)), Line::from(""), Line::from("買入".repeat(5))];
        // 25 columns over 10 is three rows, the blank line one, ten CJK columns one.
        assert_eq!(wrapped_rows(&lines, 10), 5);
        assert_eq!(wrapped_rows(&lines, 0), 25 + 1 + 20);
    }

    #[test]
    fn test_short_time_falls_back_to_raw() {
        assert_eq!(short_time("2026-01-02T09:30:05+08:00"), "09:30:05");
        assert_eq!(short_time("later"), "later");
    }
}
