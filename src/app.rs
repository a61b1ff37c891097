use crate::auth::SelectedCredential;
use crate::gateway::{ImagePayload, mime_for_path};
use crate::session::{Notice, NoticeLevel, Session, SessionView};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NOTICE_HISTORY: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Normal,
    SymbolInput,
    ImagePathInput,
    ChatInput,
    KeyInput,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tab {
    Analysis,
    Chat,
}

/// Work the key handler hands off to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    SetSymbol(String),
    AnalyzeFile(PathBuf),
    Chat(String),
    ActivateKey(String),
    RefreshIndices,
    ClearAnalysis,
    DismissPrompt,
}

pub struct App {
    pub should_quit: bool,
    pub state: AppState,
    pub tab: Tab,
    pub input: String,
    pub scroll: u16,
    pub view: SessionView,
    pub notices: VecDeque<Notice>,
    session: Session,
    credentials: Arc<SelectedCredential>,
}

impl App {
    pub async fn new(session: Session, credentials: Arc<SelectedCredential>) -> Self {
        let view = session.view(false).await;
        Self {
            should_quit: false,
            state: AppState::Normal,
            tab: Tab::Analysis,
            input: String::new(),
            scroll: 0,
            view,
            notices: VecDeque::new(),
            session,
            credentials,
        }
    }

    pub async fn run(&mut self, terminal: &mut crate::tui::Tui) -> io::Result<()> {
        self.session.check_auth().await;

        while !self.should_quit {
            self.sync().await;
            terminal.draw(|f| crate::ui::render(f, self))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        if let Some(action) = self.handle_key(key) {
                            self.dispatch(action);
                        }
                    }
                }
            }
        }

        self.session.shutdown().await;
        Ok(())
    }

    async fn sync(&mut self) {
        let mut view = self.session.view(true).await;
        for notice in view.notices.drain(..) {
            self.notices.push_back(notice);
        }
        while self.notices.len() > NOTICE_HISTORY {
            self.notices.pop_front();
        }
        self.view = view;
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        match self.state {
            AppState::Normal => self.handle_normal_key(key.code),
            _ => self.handle_input_key(key.code),
        }
    }

    fn handle_normal_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Esc if self.view.auth_prompt => return Some(Action::DismissPrompt),
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('s') => self.begin_input(AppState::SymbolInput),
            KeyCode::Char('o') => self.begin_input(AppState::ImagePathInput),
            KeyCode::Char('i') => {
                self.tab = Tab::Chat;
                self.begin_input(AppState::ChatInput);
            }
            KeyCode::Char('k') => self.begin_input(AppState::KeyInput),
            KeyCode::Char('c') | KeyCode::Tab => {
                self.tab = match self.tab {
                    Tab::Analysis => Tab::Chat,
                    Tab::Chat => Tab::Analysis,
                };
                self.scroll = 0;
            }
            KeyCode::Char('r') => return Some(Action::RefreshIndices),
            KeyCode::Char('x') => return Some(Action::ClearAnalysis),
            KeyCode::Char(c @ '1'..='9') => {
                let idx = c as usize - '1' as usize;
                if let Some(symbol) = self.view.quick_symbols.get(idx) {
                    return Some(Action::SetSymbol(symbol.clone()));
                }
            }
            // Chat scroll counts lines back from the newest message.
            KeyCode::Down | KeyCode::Char('j') => match self.tab {
                Tab::Analysis => self.scroll = self.scroll.saturating_add(1),
                Tab::Chat => self.scroll = self.scroll.saturating_sub(1),
            },
            KeyCode::Up => match self.tab {
                Tab::Analysis => self.scroll = self.scroll.saturating_sub(1),
                Tab::Chat => self.scroll = self.scroll.saturating_add(1),
            },
            _ => {}
        }
        None
    }

    fn handle_input_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Esc => {
                self.input.clear();
                self.state = AppState::Normal;
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input).trim().to_string();
                let state = std::mem::replace(&mut self.state, AppState::Normal);
                if text.is_empty() {
                    return None;
                }
                return match state {
                    AppState::SymbolInput => Some(Action::SetSymbol(text)),
                    AppState::ImagePathInput => Some(Action::AnalyzeFile(expand_home(&text))),
                    AppState::ChatInput => Some(Action::Chat(text)),
                    AppState::KeyInput => Some(Action::ActivateKey(text)),
                    AppState::Normal => None,
                };
            }
            _ => {}
        }
        None
    }

    fn begin_input(&mut self, state: AppState) {
        self.input.clear();
        self.state = state;
    }

    /// Runs the action in the background so drawing never waits on the model.
    fn dispatch(&mut self, action: Action) {
        debug!("Dispatching {:?}", redacted(&action));
        let session = self.session.clone();
        match action {
            Action::SetSymbol(symbol) => {
                self.scroll = 0;
                tokio::spawn(async move {
                    session.set_symbol(&symbol).await;
                });
            }
            Action::RefreshIndices => {
                tokio::spawn(async move { session.request_refresh().await });
            }
            Action::ClearAnalysis => {
                self.scroll = 0;
                tokio::spawn(async move { session.clear_analysis().await });
            }
            Action::DismissPrompt => {
                self.view.auth_prompt = false;
                tokio::spawn(async move { session.dismiss_auth_prompt().await });
            }
            Action::Chat(text) => {
                self.tab = Tab::Chat;
                tokio::spawn(async move {
                    let _ = session.send_chat(&text).await;
                });
            }
            Action::AnalyzeFile(path) => {
                self.tab = Tab::Analysis;
                self.scroll = 0;
                tokio::spawn(async move {
                    match load_chart(&path).await {
                        Ok(image) => {
                            let _ = session.analyze_image(image).await;
                        }
                        Err(message) => session.notify(NoticeLevel::Error, message).await,
                    }
                });
            }
            Action::ActivateKey(raw) => {
                if !self.credentials.select(&raw) {
                    tokio::spawn(async move {
                        session.notify(NoticeLevel::Error, "That key is empty or a placeholder.").await;
                    });
                    return;
                }
                tokio::spawn(async move {
                    if let Err(err) = session.activate().await {
                        session.notify(NoticeLevel::Error, format!("Activation failed: {err}")).await;
                    }
                });
            }
        }
    }
}

async fn load_chart(path: &std::path::Path) -> Result<ImagePayload, String> {
    let has_image_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "webp" | "gif"))
        .unwrap_or(false);
    if !has_image_ext {
        return Err(format!("{} is not an image ({})", path.display(), mime_for_path(path)));
    }
    ImagePayload::from_path(path)
        .await
        .map_err(|e| format!("Could not read {}: {}", path.display(), e))
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

fn redacted(action: &Action) -> Action {
    match action {
        Action::ActivateKey(_) => Action::ActivateKey("***".to_string()),
        other => other.clone(),
    }
}
