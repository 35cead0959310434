use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::config::InputLimits;
use crate::error::{AppError, AppResult};
use crate::models::{
    derive_pack_name, BackgroundMode, ButtonToken, CreationMode, DialogueEvent, HexColor,
    MenuButton, Position, SessionState, SizeTier, StyleStep, UserSession,
};

const MAX_PACK_TITLE_CHARS: usize = 64;

/// Text and menu sent back for one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub buttons: Vec<MenuButton>,
}

impl Reply {
    fn new(text: impl Into<String>, buttons: Vec<MenuButton>) -> Self {
        Self {
            text: text.into(),
            buttons,
        }
    }
}

/// Work the caller must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    None,
    Create,
    ShowQuota,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub reply: Reply,
    pub action: SessionAction,
}

impl Transition {
    fn reply(reply: Reply) -> Self {
        Self {
            reply,
            action: SessionAction::None,
        }
    }
}

/// Dialogue rules. Pure: all state lives in the [`UserSession`] passed in.
pub struct SessionMachine {
    limits: InputLimits,
    bot_username: String,
    fonts: Vec<String>,
}

impl SessionMachine {
    pub fn new(limits: InputLimits, bot_username: impl Into<String>, fonts: Vec<String>) -> Self {
        Self {
            limits,
            bot_username: bot_username.into(),
            fonts,
        }
    }

    pub fn handle(&self, session: &mut UserSession, event: DialogueEvent) -> Transition {
        let state = session.state;

        // Global buttons, valid in every state.
        if let DialogueEvent::Button(token) = &event {
            match token {
                ButtonToken::Back => {
                    if state != SessionState::Idle {
                        tracing::debug!(user_id = session.user_id, from = state.name(), "Dialogue cancelled");
                        session.reset();
                        self.advance(session, SessionState::Idle);
                    }
                    return Transition::reply(self.prompt(session));
                }
                ButtonToken::Quota => {
                    return Transition {
                        reply: Reply::default(),
                        action: SessionAction::ShowQuota,
                    }
                }
                ButtonToken::NewPack => {
                    if state != SessionState::AwaitingPackName {
                        session.reset();
                        self.advance(session, SessionState::AwaitingPackName);
                    }
                    return Transition::reply(self.prompt(session));
                }
                _ => {}
            }
        }

        match (state, event) {
            (SessionState::Idle, DialogueEvent::Button(ButtonToken::Menu)) => {
                self.advance(session, SessionState::StyleMenu);
            }
            (
                SessionState::Idle | SessionState::StyleMenu,
                DialogueEvent::Button(ButtonToken::Mode(mode)),
            ) => {
                session.mode = Some(mode);
                let next = match mode {
                    CreationMode::Simple => SessionState::AwaitingText,
                    CreationMode::Advanced => SessionState::AwaitingPhoto,
                };
                self.advance(session, next);
            }

            (SessionState::AwaitingPhoto, DialogueEvent::Photo(photo)) => {
                if let Err(e) = self.validate_photo(&photo) {
                    return self.reject(session, e);
                }
                session.pending_photo = Some(photo);
                session.background = BackgroundMode::Photo;
                self.advance(session, SessionState::AwaitingText);
            }
            (
                SessionState::AwaitingPhoto,
                DialogueEvent::Button(ButtonToken::Background(mode @ (BackgroundMode::Transparent | BackgroundMode::Solid))),
            ) => {
                session.pending_photo = None;
                session.background = mode;
                self.advance(session, SessionState::AwaitingText);
            }

            (SessionState::AwaitingText, DialogueEvent::Text(text)) => {
                let text = match self.validate_text(&text) {
                    Ok(text) => text,
                    Err(e) => return self.reject(session, e),
                };
                session.pending_text = Some(text);

                if session.mode == Some(CreationMode::Advanced) {
                    self.advance(session, SessionState::AwaitingStyle(StyleStep::Color));
                } else {
                    self.advance(session, SessionState::ReadyToCreate);
                    return Transition {
                        reply: Reply::new("Creating your sticker...", Vec::new()),
                        action: SessionAction::Create,
                    };
                }
            }

            (SessionState::AwaitingStyle(_), DialogueEvent::Button(ButtonToken::Font(id))) => {
                if !self.fonts.is_empty() && !self.fonts.contains(&id) {
                    return self.reject(
                        session,
                        AppError::Validation(format!("Font {} is not available.", id)),
                    );
                }
                session.font = Some(id);
                session.revision += 1;
            }
            (
                SessionState::AwaitingStyle(StyleStep::Color),
                DialogueEvent::Button(ButtonToken::Color(color)),
            ) => {
                session.color = Some(color);
                self.advance(session, SessionState::AwaitingStyle(StyleStep::FontSize));
            }
            (SessionState::AwaitingStyle(StyleStep::Color), DialogueEvent::Text(raw)) => {
                match raw.parse::<HexColor>() {
                    Ok(color) => {
                        session.color = Some(color);
                        self.advance(session, SessionState::AwaitingStyle(StyleStep::FontSize));
                    }
                    Err(e) => return self.reject(session, e),
                }
            }
            (
                SessionState::AwaitingStyle(StyleStep::FontSize),
                DialogueEvent::Button(ButtonToken::Size(size)),
            ) => {
                session.size = Some(size);
                self.advance(session, SessionState::AwaitingStyle(StyleStep::Position));
            }
            (
                SessionState::AwaitingStyle(StyleStep::Position),
                DialogueEvent::Button(ButtonToken::Position(position)),
            ) => {
                session.position = Some(position);
                self.advance(session, SessionState::ReadyToCreate);
            }

            (SessionState::ReadyToCreate, DialogueEvent::Button(ButtonToken::Create)) => {
                return Transition {
                    reply: Reply::new("Creating your sticker...", Vec::new()),
                    action: SessionAction::Create,
                };
            }

            (SessionState::AwaitingPackName, DialogueEvent::Text(title)) => {
                let title = match self.validate_pack_title(&title) {
                    Ok(title) => title,
                    Err(e) => return self.reject(session, e),
                };
                session.active_pack = Some(derive_pack_name(
                    &title,
                    session.user_id,
                    &self.bot_username,
                ));
                session.pack_title = Some(title);

                // Resume an interrupted creation if there is one.
                let next = if session.pending_text.is_some() {
                    SessionState::ReadyToCreate
                } else {
                    SessionState::Idle
                };
                self.advance(session, next);
            }

            (state, event) => {
                tracing::debug!(
                    user_id = session.user_id,
                    state = state.name(),
                    event = event_name(&event),
                    "Event does not match state, re-prompting"
                );
            }
        }

        Transition::reply(self.prompt(session))
    }

    /// Called once a creation finished: back to idle, pack kept.
    pub fn complete(&self, session: &mut UserSession) {
        session.reset();
        self.advance(session, SessionState::Idle);
    }

    /// Pack became unusable: ask for a new one, keeping the pending sticker.
    pub fn require_pack(&self, session: &mut UserSession) {
        session.active_pack = None;
        session.pack_title = None;
        self.advance(session, SessionState::AwaitingPackName);
    }

    fn advance(&self, session: &mut UserSession, next: SessionState) {
        session.state = next;
        session.revision += 1;
    }

    fn reject(&self, session: &UserSession, error: AppError) -> Transition {
        let prompt = self.prompt(session);
        Transition::reply(Reply::new(
            format!("{}\n{}", error.user_message(), prompt.text),
            prompt.buttons,
        ))
    }

    pub fn validate_text(&self, text: &str) -> AppResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Please send some text.".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.limits.max_text_chars {
            return Err(AppError::Validation(format!(
                "Text is too long ({} characters, at most {}).",
                chars, self.limits.max_text_chars
            )));
        }
        Ok(text.to_string())
    }

    pub fn validate_photo(&self, photo: &Bytes) -> AppResult<()> {
        if photo.is_empty() {
            return Err(AppError::Validation("The photo is empty.".to_string()));
        }
        if photo.len() > self.limits.max_photo_bytes {
            return Err(AppError::Validation(format!(
                "The photo is too large (at most {} MB).",
                self.limits.max_photo_bytes / (1024 * 1024)
            )));
        }
        image::guess_format(photo)
            .map_err(|_| AppError::Validation("Unsupported photo format.".to_string()))?;
        Ok(())
    }

    fn validate_pack_title(&self, title: &str) -> AppResult<String> {
        let title = title.trim();
        if title.is_empty() || title.chars().count() > MAX_PACK_TITLE_CHARS {
            return Err(AppError::Validation(format!(
                "Pack titles must be 1 to {} characters.",
                MAX_PACK_TITLE_CHARS
            )));
        }
        Ok(title.to_string())
    }

    /// Prompt and menu for the session's current state.
    pub fn prompt(&self, session: &UserSession) -> Reply {
        let back = || MenuButton::new("Back", ButtonToken::Back);

        match session.state {
            SessionState::Idle => Reply::new(
                "Send /menu or pick an option to make a sticker.",
                vec![
                    MenuButton::new("Make a sticker", ButtonToken::Menu),
                    MenuButton::new("My quota", ButtonToken::Quota),
                    MenuButton::new("New pack", ButtonToken::NewPack),
                ],
            ),
            SessionState::StyleMenu => Reply::new(
                "Choose a mode.",
                vec![
                    MenuButton::new("Simple", ButtonToken::Mode(CreationMode::Simple)),
                    MenuButton::new("Advanced", ButtonToken::Mode(CreationMode::Advanced)),
                    back(),
                ],
            ),
            SessionState::AwaitingPhoto => Reply::new(
                "Send a background photo, or pick a background.",
                vec![
                    MenuButton::new("Transparent", ButtonToken::Background(BackgroundMode::Transparent)),
                    MenuButton::new("Gradient", ButtonToken::Background(BackgroundMode::Solid)),
                    back(),
                ],
            ),
            SessionState::AwaitingText => Reply::new("Send the sticker text.", vec![back()]),
            SessionState::AwaitingStyle(StyleStep::Color) => {
                let mut buttons: Vec<MenuButton> = [
                    ("White", HexColor::WHITE),
                    ("Black", HexColor::BLACK),
                    ("Red", HexColor { r: 0xEF, g: 0x44, b: 0x44 }),
                    ("Yellow", HexColor { r: 0xFA, g: 0xCC, b: 0x15 }),
                    ("Blue", HexColor { r: 0x3B, g: 0x82, b: 0xF6 }),
                ]
                .into_iter()
                .map(|(label, color)| MenuButton::new(label, ButtonToken::Color(color)))
                .collect();
                buttons.extend(self.font_buttons());
                buttons.push(back());
                Reply::new("Pick a text colour, or send a hex code like #FF0000.", buttons)
            }
            SessionState::AwaitingStyle(StyleStep::FontSize) => {
                let mut buttons = vec![
                    MenuButton::new("Small", ButtonToken::Size(SizeTier::Small)),
                    MenuButton::new("Medium", ButtonToken::Size(SizeTier::Medium)),
                    MenuButton::new("Large", ButtonToken::Size(SizeTier::Large)),
                ];
                buttons.extend(self.font_buttons());
                buttons.push(back());
                Reply::new("Pick a text size.", buttons)
            }
            SessionState::AwaitingStyle(StyleStep::Position) => {
                let mut buttons: Vec<MenuButton> = [
                    ("Top", Position::Top),
                    ("Center", Position::Center),
                    ("Bottom", Position::Bottom),
                    ("Left", Position::Left),
                    ("Right", Position::Right),
                ]
                .into_iter()
                .map(|(label, position)| MenuButton::new(label, ButtonToken::Position(position)))
                .collect();
                buttons.extend(self.font_buttons());
                buttons.push(back());
                Reply::new("Pick where the text goes.", buttons)
            }
            SessionState::ReadyToCreate => Reply::new(
                "All set.",
                vec![MenuButton::new("Create", ButtonToken::Create), back()],
            ),
            SessionState::AwaitingPackName => {
                Reply::new("Send a title for your new sticker pack.", vec![back()])
            }
        }
    }

    fn font_buttons(&self) -> impl Iterator<Item = MenuButton> + '_ {
        self.fonts
            .iter()
            .map(|id| MenuButton::new(format!("Font: {}", id), ButtonToken::Font(id.clone())))
    }
}

fn event_name(event: &DialogueEvent) -> String {
    match event {
        DialogueEvent::Text(_) => "text".to_string(),
        DialogueEvent::Photo(_) => "photo".to_string(),
        DialogueEvent::Button(token) => token.to_string(),
    }
}

/// In-memory sessions. Callers hold the user's lock while loading, mutating
/// and saving.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<i64, UserSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, user_id: i64) -> UserSession {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserSession::new(user_id))
    }

    pub async fn save(&self, session: UserSession) {
        self.sessions.write().await.insert(session.user_id, session);
    }
}
