//! Interactive ratatui mapper.
//!
//! The screen is a pure projection of the [`MappingController`] plus a small
//! [`UiState`] (focus, list cursors, input mode). The loop redraws only when
//! the session version, the UI state or the notice queue changed, and polls
//! finished requests and the search debouncer on idle ticks.
//!
//! Dragging is keyboard driven: `space` grabs the highlighted candidate,
//! `enter` drops it on the tray. `y` copies the grabbed payload to the system
//! clipboard (OSC 52), and pasting a payload into the terminal drops it, so
//! elements can be carried between two mapper windows.

pub mod widgets;

use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::style::Print;
use miette::IntoDiagnostic;

use crate::controller::MappingController;
use crate::model::ExportFormat;
use crate::session::Direction;

/// Which list has keyboard focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pane {
    #[default]
    Candidates,
    Tray,
}

/// Which document a picker chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickKind {
    Target,
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    /// Typing into the search box.
    Search,
    /// Document picker open, `cursor` into the document list.
    Pick { kind: PickKind, cursor: usize },
}

/// Presentation-only state.
#[derive(Debug, Clone, Default)]
pub struct UiState {
    pub focus: Pane,
    pub mode: Mode,
    pub candidate_cursor: usize,
    pub tray_cursor: usize,
    revision: u64,
}

impl UiState {
    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Keep list cursors inside their lists.
    fn clamp(&mut self, candidates: usize, tray: usize) {
        let c = self.candidate_cursor.min(candidates.saturating_sub(1));
        let t = self.tray_cursor.min(tray.saturating_sub(1));
        if (c, t) != (self.candidate_cursor, self.tray_cursor) {
            self.candidate_cursor = c;
            self.tray_cursor = t;
            self.touch();
        }
    }
}

/// What the last frame was drawn from.
type FrameKey = (u64, u64, u64);

pub struct MapperTui {
    controller: MappingController,
    ui: UiState,
    should_quit: bool,
    drawn: Option<FrameKey>,
}

impl MapperTui {
    pub fn new(controller: MappingController) -> Self {
        Self {
            controller,
            ui: UiState::default(),
            should_quit: false,
            drawn: None,
        }
    }

    pub fn controller(&self) -> &MappingController {
        &self.controller
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    fn frame_key(&self) -> FrameKey {
        (
            self.controller.session().version(),
            self.ui.revision(),
            self.controller.notices().revision(),
        )
    }

    /// Run the event loop until the user quits.
    pub fn run(&mut self) -> miette::Result<()> {
        let mut terminal = ratatui::init();
        if let Err(e) = execute!(io::stdout(), EnableBracketedPaste) {
            tracing::warn!(error = %e, "bracketed paste unavailable");
        }

        let result = self.event_loop(&mut terminal);

        let _ = execute!(io::stdout(), DisableBracketedPaste);
        ratatui::restore();
        result
    }

    fn event_loop(&mut self, terminal: &mut ratatui::DefaultTerminal) -> miette::Result<()> {
        loop {
            let session = self.controller.session();
            self.ui
                .clamp(session.candidates().len(), session.mapped().len());

            let key = self.frame_key();
            if self.drawn != Some(key) {
                terminal
                    .draw(|frame| widgets::render(frame, &widgets::View::new(&self.controller, &self.ui)))
                    .into_diagnostic()?;
                self.drawn = Some(key);
            }

            if self.should_quit {
                return Ok(());
            }

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                match event::read().into_diagnostic()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key, Instant::now());
                    }
                    Event::Paste(text) => self.handle_paste(&text),
                    Event::Resize(..) => self.drawn = None,
                    _ => {}
                }
            } else {
                self.controller.tick(Instant::now());
            }
        }
    }

    /// Dispatch one key press.
    pub fn handle_key(&mut self, key: KeyEvent, now: Instant) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => self.should_quit = true,
                KeyCode::Char('s') => {
                    let _ = self.controller.save();
                }
                _ => {}
            }
            return;
        }
        match self.ui.mode {
            Mode::Normal => self.normal_key(key.code),
            Mode::Search => self.search_key(key.code, now),
            Mode::Pick { kind, cursor } => self.pick_key(key.code, kind, cursor),
        }
    }

    /// A bracketed paste: drop the pasted payload onto the tray.
    pub fn handle_paste(&mut self, text: &str) {
        if self.ui.mode == Mode::Search {
            let mut input = self.controller.search_input().to_string();
            input.push_str(text.lines().next().unwrap_or_default());
            self.controller.search(&input, Instant::now());
            self.ui.touch();
            return;
        }
        if self.controller.paste(text).is_some() {
            self.ui.focus = Pane::Tray;
            self.ui.tray_cursor = self.controller.session().mapped().len().saturating_sub(1);
            self.ui.touch();
        }
    }

    fn normal_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('t') => self.open_picker(PickKind::Target),
            KeyCode::Char('s') => self.open_picker(PickKind::Source),
            KeyCode::Char('/') => {
                self.ui.mode = Mode::Search;
                self.ui.touch();
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.ui.focus = match self.ui.focus {
                    Pane::Candidates => Pane::Tray,
                    Pane::Tray => Pane::Candidates,
                };
                self.ui.touch();
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::Char('[') | KeyCode::Left => {
                self.controller.advance(Direction::Prev);
            }
            KeyCode::Char(']') | KeyCode::Right => {
                self.controller.advance(Direction::Next);
            }
            KeyCode::Char(' ') => {
                if self.ui.focus == Pane::Candidates {
                    self.controller.grab(self.ui.candidate_cursor);
                    self.ui.touch();
                }
            }
            KeyCode::Enter => {
                if self.controller.drop_grabbed().is_some() {
                    self.ui.tray_cursor = self.controller.session().mapped().len().saturating_sub(1);
                }
                self.ui.touch();
            }
            KeyCode::Esc => {
                self.controller.cancel_grab();
                self.ui.touch();
            }
            KeyCode::Char('x') | KeyCode::Delete => {
                if self.ui.focus == Pane::Tray && !self.controller.session().mapped().is_empty() {
                    let _ = self.controller.remove_candidate(self.ui.tray_cursor);
                }
            }
            KeyCode::Char('c') => {
                self.controller.clear_candidates();
            }
            KeyCode::Char('r') => {
                self.controller.cycle_relationship_type();
            }
            KeyCode::Char('e') => {
                self.controller.export(ExportFormat::Excel);
            }
            KeyCode::Char('E') => {
                self.controller.export(ExportFormat::Csv);
            }
            KeyCode::Char('y') => self.yank(),
            _ => {}
        }
    }

    fn search_key(&mut self, code: KeyCode, now: Instant) {
        let mut input = self.controller.search_input().to_string();
        match code {
            KeyCode::Esc => {
                self.ui.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                self.ui.mode = Mode::Normal;
                self.controller.flush_search();
            }
            KeyCode::Backspace => {
                input.pop();
                self.controller.search(&input, now);
            }
            KeyCode::Char(c) => {
                input.push(c);
                self.controller.search(&input, now);
            }
            _ => return,
        }
        self.ui.touch();
    }

    fn open_picker(&mut self, kind: PickKind) {
        let session = self.controller.session();
        if session.documents().is_empty() {
            return;
        }
        let current = match kind {
            PickKind::Target => session.target_doc(),
            PickKind::Source => session.source_doc(),
        };
        let cursor = current
            .and_then(|doc| session.documents().iter().position(|d| d.doc_identifier == doc))
            .unwrap_or(0);
        self.ui.mode = Mode::Pick { kind, cursor };
        self.ui.touch();
    }

    fn pick_key(&mut self, code: KeyCode, kind: PickKind, cursor: usize) {
        let count = self.controller.session().documents().len();
        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.ui.mode = Mode::Normal,
            KeyCode::Up | KeyCode::Char('k') => {
                self.ui.mode = Mode::Pick {
                    kind,
                    cursor: cursor.saturating_sub(1),
                };
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.ui.mode = Mode::Pick {
                    kind,
                    cursor: (cursor + 1).min(count.saturating_sub(1)),
                };
            }
            KeyCode::Enter => {
                self.ui.mode = Mode::Normal;
                let Some(doc) = self
                    .controller
                    .session()
                    .documents()
                    .get(cursor)
                    .map(|d| d.doc_identifier.clone())
                else {
                    return;
                };
                let _ = match kind {
                    PickKind::Target => self.controller.select_target_document(&doc),
                    PickKind::Source => {
                        self.ui.candidate_cursor = 0;
                        self.controller.select_source_document(&doc)
                    }
                };
            }
            _ => return,
        }
        self.ui.touch();
    }

    fn move_cursor(&mut self, delta: isize) {
        let session = self.controller.session();
        let (cursor, len) = match self.ui.focus {
            Pane::Candidates => (&mut self.ui.candidate_cursor, session.candidates().len()),
            Pane::Tray => (&mut self.ui.tray_cursor, session.mapped().len()),
        };
        let next = cursor
            .saturating_add_signed(delta)
            .min(len.saturating_sub(1));
        if next != *cursor {
            *cursor = next;
            self.ui.touch();
        }
    }

    /// Copy the grabbed payload to the clipboard.
    fn yank(&mut self) {
        let Some(payload) = self.controller.grabbed_payload() else {
            return;
        };
        let sequence = osc52_sequence(payload);
        if let Err(e) = execute!(io::stdout(), Print(sequence)) {
            tracing::warn!(error = %e, "clipboard copy failed");
        }
    }
}

/// Terminal escape that puts `text` on the system clipboard.
pub fn osc52_sequence(text: &str) -> String {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    let encoded = STANDARD.encode(text.as_bytes());
    format!("\x1b]52;c;{encoded}\x1b\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Gateway;
    use crate::controller::ControllerOptions;
    use crate::demo::DemoService;
    use crate::loader::LoadMode;

    fn tui() -> MapperTui {
        let mut c = MappingController::new(
            Gateway::new(DemoService::seeded()),
            ControllerOptions {
                mode: LoadMode::Inline,
                ..Default::default()
            },
        );
        c.open();
        MapperTui::new(c)
    }

    fn press(t: &mut MapperTui, code: KeyCode) {
        t.handle_key(KeyEvent::new(code, KeyModifiers::NONE), Instant::now());
    }

    fn pick(t: &mut MapperTui, kind: char, doc: &str) {
        press(t, KeyCode::Char(kind));
        let idx = t
            .controller()
            .session()
            .documents()
            .iter()
            .position(|d| d.doc_identifier == doc)
            .unwrap();
        if let Mode::Pick { kind, .. } = t.ui.mode {
            t.ui.mode = Mode::Pick { kind, cursor: idx };
        }
        press(t, KeyCode::Enter);
    }

    #[test]
    fn keyboard_drag_and_drop_fills_tray() {
        let mut t = tui();
        pick(&mut t, 't', "CSF");
        pick(&mut t, 's', "ATTACK");
        assert_eq!(t.controller().session().target_doc(), Some("CSF"));
        assert_eq!(t.controller().session().source_doc(), Some("ATTACK"));

        press(&mut t, KeyCode::Char(' '));
        assert!(t.controller().grabbed().is_some());
        press(&mut t, KeyCode::Enter);
        press(&mut t, KeyCode::Down);
        press(&mut t, KeyCode::Char(' '));
        press(&mut t, KeyCode::Enter);
        assert_eq!(t.controller().session().mapped().len(), 2);

        press(&mut t, KeyCode::Tab);
        press(&mut t, KeyCode::Char('x'));
        assert_eq!(t.controller().session().mapped().len(), 1);
    }

    #[test]
    fn search_mode_captures_letters() {
        let mut t = tui();
        pick(&mut t, 's', "ATTACK");
        press(&mut t, KeyCode::Char('/'));
        for c in "phish".chars() {
            press(&mut t, KeyCode::Char(c));
        }
        assert_eq!(t.controller().search_input(), "phish");
        assert!(!t.should_quit());
        press(&mut t, KeyCode::Enter);
        assert_eq!(t.ui().mode, Mode::Normal);
        assert_eq!(t.controller().session().candidates().len(), 2);
    }

    #[test]
    fn pasted_payload_is_dropped() {
        let mut t = tui();
        pick(&mut t, 't', "CSF");
        pick(&mut t, 's', "ATTACK");
        let element = t.controller().session().candidates()[1].clone();
        let payload = crate::transfer::encode(&element).unwrap();
        t.handle_paste(&payload);
        assert_eq!(t.controller().session().mapped(), &[element]);
        assert_eq!(t.ui().focus, Pane::Tray);
    }

    #[test]
    fn osc52_wraps_base64() {
        assert_eq!(osc52_sequence("hi"), "\x1b]52;c;aGk=\x1b\\");
    }

    #[test]
    fn quit_keys() {
        let mut t = tui();
        press(&mut t, KeyCode::Char('q'));
        assert!(t.should_quit());
        let mut t = tui();
        t.handle_key(
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Instant::now(),
        );
        assert!(t.should_quit());
    }
}
