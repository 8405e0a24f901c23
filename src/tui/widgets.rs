//! TUI widget rendering: header, progress, target, candidates, tray, notices.

use std::path::Path;

use ratatui::Frame;
use ratatui::layout::{Constraint, Flex, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Clear, LineGauge, List, ListItem, ListState, Paragraph, Wrap,
};

use super::{Mode, Pane, PickKind, UiState};
use crate::controller::MappingController;
use crate::notice::{Level, Notices};
use crate::session::{Direction, Session};

/// Everything a frame is drawn from.
pub struct View<'a> {
    pub session: &'a Session,
    pub notices: &'a Notices,
    pub ui: &'a UiState,
    pub search_input: &'a str,
    pub grabbed: Option<usize>,
    pub busy: bool,
    pub exporting: bool,
    pub last_export: Option<&'a Path>,
}

impl<'a> View<'a> {
    pub fn new(controller: &'a MappingController, ui: &'a UiState) -> Self {
        Self {
            session: controller.session(),
            notices: controller.notices(),
            ui,
            search_input: controller.search_input(),
            grabbed: controller.grabbed().map(|g| g.origin),
            busy: controller.busy(),
            exporting: controller.exporting(),
            last_export: controller.last_export(),
        }
    }
}

const DIM: Style = Style::new().fg(Color::DarkGray);

fn button(label: &str, enabled: bool, color: Color) -> Span<'static> {
    if enabled {
        Span::styled(
            format!("[{label}]"),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(format!("[{label}]"), DIM)
    }
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(style)
        .title(title)
}

/// Main layout rendering.
pub fn render(frame: &mut Frame, view: &View) {
    let [header_area, progress_area, target_area, body_area, actions_area, notice_area, help_area] =
        Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(5),
            Constraint::Fill(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(frame.area());

    render_header(frame, header_area, view);
    render_progress(frame, progress_area, view.session);
    render_target(frame, target_area, view.session);

    let [left, right] =
        Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(body_area);
    let [search_area, candidates_area] =
        Layout::vertical([Constraint::Length(3), Constraint::Fill(1)]).areas(left);
    let [tray_area, links_area] =
        Layout::vertical([Constraint::Fill(1), Constraint::Length(6)]).areas(right);

    render_search(frame, search_area, view);
    render_candidates(frame, candidates_area, view);
    render_tray(frame, tray_area, view);
    render_links(frame, links_area, view.session);
    render_actions(frame, actions_area, view);
    render_notice(frame, notice_area, view.notices);
    render_help(frame, help_area, view.ui.mode);

    if let Mode::Pick { kind, cursor } = view.ui.mode {
        render_picker(frame, kind, cursor, view.session);
    }
}

fn render_header(frame: &mut Frame, area: Rect, view: &View) {
    let session = view.session;
    let doc_label = |doc: Option<&str>, loading: Option<&str>| match (loading, doc) {
        (Some(l), _) => format!("{l} (loading…)"),
        (None, Some(d)) => session.document(d).map_or(d, |x| x.label()).to_string(),
        (None, None) => "none".to_string(),
    };
    let mut spans = vec![
        Span::styled(
            " crosswalk ",
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            " target: {} :: source: {} :: relationship: ",
            doc_label(session.target_doc(), session.loading_target()),
            doc_label(session.source_doc(), session.loading_source()),
        )),
        match session.relationship_type() {
            Some(ty) => Span::styled(ty.to_string(), Style::default().fg(Color::Yellow)),
            None => Span::styled("none (r)", Style::default().fg(Color::Red)),
        },
    ];
    if view.busy {
        spans.push(Span::styled(" ⟳", DIM));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_progress(frame: &mut Frame, area: Rect, session: &Session) {
    let total = session.targets().len();
    let (label, ratio) = if total == 0 {
        ("no target elements".to_string(), 0.0)
    } else {
        let i = session.cursor() + 1;
        (format!("element {i} of {total}"), i as f64 / total as f64)
    };
    let gauge = LineGauge::default()
        .label(label)
        .ratio(ratio)
        .filled_style(Style::default().fg(Color::Cyan));
    frame.render_widget(gauge, area);
}

fn render_target(frame: &mut Frame, area: Rect, session: &Session) {
    let block = Block::default().borders(Borders::ALL).title(" Target element ");
    let body = match session.current_target() {
        Some(el) => vec![
            Line::from(vec![
                Span::styled(
                    el.element_identifier.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!(" ({})", el.element_type), DIM),
                Span::raw(format!("  {}", el.title)),
            ]),
            Line::from(el.text.clone()),
        ],
        None => vec![Line::styled("Pick a target document with t", DIM)],
    };
    frame.render_widget(
        Paragraph::new(body).block(block).wrap(Wrap { trim: true }),
        area,
    );
}

fn render_search(frame: &mut Frame, area: Rect, view: &View) {
    let editing = view.ui.mode == Mode::Search;
    let mut spans = vec![Span::raw(view.search_input.to_string())];
    if editing {
        spans.push(Span::styled("▏", Style::default().fg(Color::Cyan)));
    }
    let block = pane_block(" Search (/) ".into(), editing);
    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn render_candidates(frame: &mut Frame, area: Rect, view: &View) {
    let session = view.session;
    let title = match session.source_doc() {
        Some(doc) => format!(" Candidates: {doc} ({}) ", session.candidates().len()),
        None => " Candidates (s) ".to_string(),
    };
    let items: Vec<ListItem> = session
        .candidates()
        .iter()
        .enumerate()
        .map(|(i, el)| {
            let dragging = view.grabbed == Some(i);
            let mapped = session.mapped().iter().any(|m| m.same_identifier(el));
            let marker = if dragging {
                Span::styled("» ", Style::default().fg(Color::Yellow))
            } else if mapped {
                Span::styled("✓ ", Style::default().fg(Color::Green))
            } else {
                Span::raw("  ")
            };
            let mut id_style = Style::default().add_modifier(Modifier::BOLD);
            if dragging {
                id_style = id_style.fg(Color::Yellow).add_modifier(Modifier::ITALIC);
            }
            ListItem::new(Line::from(vec![
                marker,
                Span::styled(el.element_identifier.clone(), id_style),
                Span::raw(format!("  {}", el.title)),
            ]))
        })
        .collect();
    let focused = view.ui.focus == Pane::Candidates && view.ui.mode == Mode::Normal;
    let list = List::new(items)
        .block(pane_block(title, focused))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    if focused && !session.candidates().is_empty() {
        state.select(Some(view.ui.candidate_cursor));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_tray(frame: &mut Frame, area: Rect, view: &View) {
    let session = view.session;
    let title = format!(" Mapped ({}) ", session.mapped().len());
    let items: Vec<ListItem> = if session.mapped().is_empty() {
        vec![ListItem::new(Line::styled("Drop candidates here (space, enter)", DIM))]
    } else {
        session
            .mapped()
            .iter()
            .map(|el| {
                ListItem::new(Line::from(vec![
                    Span::styled(
                        el.element_identifier.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(format!(" [{}]", el.doc_identifier), DIM),
                    Span::raw(format!("  {}", el.title)),
                ]))
            })
            .collect()
    };
    let focused = view.ui.focus == Pane::Tray && view.ui.mode == Mode::Normal;
    let list = List::new(items)
        .block(pane_block(title, focused))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    if focused && !session.mapped().is_empty() {
        state.select(Some(view.ui.tray_cursor));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_links(frame: &mut Frame, area: Rect, session: &Session) {
    let links = session.existing_links();
    let lines: Vec<Line> = if links.is_empty() {
        vec![Line::styled("none", DIM)]
    } else {
        links
            .iter()
            .map(|r| {
                Line::from(vec![
                    Span::styled(format!("{} ", r.relationship_identifier), Style::default().fg(Color::Magenta)),
                    Span::raw(format!("{}:{}", r.dest_doc_identifier, r.dest_element_identifier)),
                    Span::styled(format!("  via {}", r.provenance_doc_identifier), DIM),
                ])
            })
            .collect()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" Existing links ({}) ", links.len()));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_actions(frame: &mut Frame, area: Rect, view: &View) {
    let session = view.session;
    let saving = session.committing();
    let mut spans = vec![
        button("◀ prev", session.can_advance(Direction::Prev), Color::Cyan),
        Span::raw(" "),
        button("next ▶", session.can_advance(Direction::Next), Color::Cyan),
        Span::raw("   "),
        button(if saving { "saving…" } else { "save" }, session.can_save(), Color::Green),
    ];
    if session.export_available() {
        spans.push(Span::raw(" "));
        spans.push(button(
            if view.exporting { "exporting…" } else { "export" },
            !view.exporting,
            Color::Magenta,
        ));
        spans.push(Span::styled(
            format!(" {} provenance doc(s)", session.ledger().len()),
            DIM,
        ));
    }
    if let Some(path) = view.last_export {
        spans.push(Span::styled(format!("  → {}", path.display()), DIM));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_notice(frame: &mut Frame, area: Rect, notices: &Notices) {
    let Some(notice) = notices.latest() else {
        return;
    };
    let color = match notice.level {
        Level::Info => Color::Blue,
        Level::Success => Color::Green,
        Level::Warning => Color::Yellow,
        Level::Error => Color::Red,
    };
    let line = Line::from(vec![
        Span::styled(
            format!("[{}] ", notice.level.tag()),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(notice.text.clone()),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn render_help(frame: &mut Frame, area: Rect, mode: Mode) {
    let text = match mode {
        Mode::Normal => {
            "t/s docs  / search  ↑↓ move  tab pane  space grab  enter drop  x remove  c clear  r type  [ ] element  ^s save  e/E export  y yank  q quit"
        }
        Mode::Search => "type to search  enter apply  esc done",
        Mode::Pick { .. } => "↑↓ choose  enter select  esc cancel",
    };
    frame.render_widget(Paragraph::new(Line::styled(text, DIM)), area);
}

fn render_picker(frame: &mut Frame, kind: PickKind, cursor: usize, session: &Session) {
    let [area] = Layout::horizontal([Constraint::Percentage(60)])
        .flex(Flex::Center)
        .areas(frame.area());
    let height = (session.documents().len() as u16 + 2).min(area.height);
    let [area] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);

    let title = match kind {
        PickKind::Target => " Target document ",
        PickKind::Source => " Source document ",
    };
    let items: Vec<ListItem> = session
        .documents()
        .iter()
        .map(|d| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<12}", d.doc_identifier),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::raw(d.label().to_string()),
                Span::styled(format!(" {}", d.version), DIM),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    state.select(Some(cursor));
    frame.render_widget(Clear, area);
    frame.render_stateful_widget(list, area, &mut state);
}
