use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;

use super::style::{BackgroundMode, HexColor, Position, SizeTier, StyleRequest};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationMode {
    /// Text only, default style, unlimited quota.
    Simple,
    /// Photo or background choice plus style picks, limited quota.
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleStep {
    Color,
    FontSize,
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    StyleMenu,
    AwaitingPhoto,
    AwaitingText,
    AwaitingStyle(StyleStep),
    ReadyToCreate,
    AwaitingPackName,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::StyleMenu => "style_menu",
            SessionState::AwaitingPhoto => "awaiting_photo",
            SessionState::AwaitingText => "awaiting_text",
            SessionState::AwaitingStyle(StyleStep::Color) => "awaiting_color",
            SessionState::AwaitingStyle(StyleStep::FontSize) => "awaiting_font_size",
            SessionState::AwaitingStyle(StyleStep::Position) => "awaiting_position",
            SessionState::ReadyToCreate => "ready_to_create",
            SessionState::AwaitingPackName => "awaiting_pack_name",
        }
    }
}

/// Per-user scratch state for the creation dialogue.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: i64,
    pub state: SessionState,
    pub mode: Option<CreationMode>,
    pub pending_text: Option<String>,
    pub pending_photo: Option<Bytes>,
    pub background: BackgroundMode,
    pub color: Option<HexColor>,
    pub size: Option<SizeTier>,
    pub position: Option<Position>,
    pub font: Option<String>,
    pub active_pack: Option<String>,
    /// Title used if the active pack still has to be created upstream.
    pub pack_title: Option<String>,
    /// Bumped on every transition; results of superseded work are dropped.
    pub revision: u64,
}

impl UserSession {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            state: SessionState::Idle,
            mode: None,
            pending_text: None,
            pending_photo: None,
            background: BackgroundMode::Transparent,
            color: None,
            size: None,
            position: None,
            font: None,
            active_pack: None,
            pack_title: None,
            revision: 0,
        }
    }

    /// Back to `Idle`, dropping scratch fields but keeping the active pack.
    pub fn reset(&mut self) {
        let active_pack = self.active_pack.take();
        let pack_title = self.pack_title.take();
        let revision = self.revision;
        *self = UserSession::new(self.user_id);
        self.active_pack = active_pack;
        self.pack_title = pack_title;
        self.revision = revision;
    }

    pub fn style_request(&self) -> Option<StyleRequest> {
        let text = self.pending_text.clone()?;
        Some(StyleRequest {
            text,
            position: self.position.unwrap_or_default(),
            font: self.font.clone(),
            color: self.color.unwrap_or_default(),
            size: self.size.unwrap_or_default(),
            background: self.background,
        })
    }
}

#[derive(Debug, Clone)]
pub enum DialogueEvent {
    Text(String),
    Photo(Bytes),
    Button(ButtonToken),
}

/// Opaque choice tokens carried by menu buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonToken {
    Menu,
    Mode(CreationMode),
    Background(BackgroundMode),
    Color(HexColor),
    Size(SizeTier),
    Position(Position),
    Font(String),
    Create,
    Back,
    Quota,
    NewPack,
}

impl fmt::Display for ButtonToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonToken::Menu => write!(f, "menu"),
            ButtonToken::Mode(CreationMode::Simple) => write!(f, "mode:simple"),
            ButtonToken::Mode(CreationMode::Advanced) => write!(f, "mode:advanced"),
            ButtonToken::Background(BackgroundMode::Transparent) => write!(f, "bg:transparent"),
            ButtonToken::Background(BackgroundMode::Solid) => write!(f, "bg:solid"),
            ButtonToken::Background(BackgroundMode::Photo) => write!(f, "bg:photo"),
            ButtonToken::Color(color) => write!(f, "color:{}", color),
            ButtonToken::Size(SizeTier::Small) => write!(f, "size:small"),
            ButtonToken::Size(SizeTier::Medium) => write!(f, "size:medium"),
            ButtonToken::Size(SizeTier::Large) => write!(f, "size:large"),
            ButtonToken::Position(position) => {
                let name = match position {
                    Position::Top => "top",
                    Position::Center => "center",
                    Position::Bottom => "bottom",
                    Position::Left => "left",
                    Position::Right => "right",
                };
                write!(f, "pos:{}", name)
            }
            ButtonToken::Font(id) => write!(f, "font:{}", id),
            ButtonToken::Create => write!(f, "create"),
            ButtonToken::Back => write!(f, "back"),
            ButtonToken::Quota => write!(f, "quota"),
            ButtonToken::NewPack => write!(f, "pack:new"),
        }
    }
}

impl FromStr for ButtonToken {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || AppError::BadRequest(format!("Unknown button token: {}", s));
        let (kind, value) = match s.split_once(':') {
            Some((kind, value)) => (kind, Some(value)),
            None => (s, None),
        };

        let token = match (kind, value) {
            ("menu", None) => ButtonToken::Menu,
            ("create", None) => ButtonToken::Create,
            ("back", None) | ("cancel", None) => ButtonToken::Back,
            ("quota", None) => ButtonToken::Quota,
            ("pack", Some("new")) => ButtonToken::NewPack,
            ("mode", Some("simple")) => ButtonToken::Mode(CreationMode::Simple),
            ("mode", Some("advanced")) => ButtonToken::Mode(CreationMode::Advanced),
            ("bg", Some("transparent")) => ButtonToken::Background(BackgroundMode::Transparent),
            ("bg", Some("solid")) => ButtonToken::Background(BackgroundMode::Solid),
            ("bg", Some("photo")) => ButtonToken::Background(BackgroundMode::Photo),
            ("color", Some(hex)) => ButtonToken::Color(hex.parse()?),
            ("size", Some("small")) => ButtonToken::Size(SizeTier::Small),
            ("size", Some("medium")) => ButtonToken::Size(SizeTier::Medium),
            ("size", Some("large")) => ButtonToken::Size(SizeTier::Large),
            ("pos", Some("top")) => ButtonToken::Position(Position::Top),
            ("pos", Some("center")) => ButtonToken::Position(Position::Center),
            ("pos", Some("bottom")) => ButtonToken::Position(Position::Bottom),
            ("pos", Some("left")) => ButtonToken::Position(Position::Left),
            ("pos", Some("right")) => ButtonToken::Position(Position::Right),
            ("font", Some(id)) if !id.is_empty() => ButtonToken::Font(id.to_string()),
            _ => return Err(unknown()),
        };

        Ok(token)
    }
}

/// One button in a reply menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuButton {
    pub label: String,
    pub token: String,
}

impl MenuButton {
    pub fn new(label: impl Into<String>, token: ButtonToken) -> Self {
        Self {
            label: label.into(),
            token: token.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_through_their_wire_form() {
        let tokens = [
            ButtonToken::Menu,
            ButtonToken::Mode(CreationMode::Advanced),
            ButtonToken::Background(BackgroundMode::Solid),
            ButtonToken::Color(HexColor { r: 0xF4, g: 0x3F, b: 0x5E }),
            ButtonToken::Size(SizeTier::Large),
            ButtonToken::Position(Position::Bottom),
            ButtonToken::Font("Vazirmatn".into()),
            ButtonToken::NewPack,
        ];
        for token in tokens {
            let parsed: ButtonToken = token.to_string().parse().unwrap();
            assert_eq!(parsed, token);
        }
    }

    #[test]
    fn cancel_is_an_alias_for_back() {
        assert_eq!("cancel".parse::<ButtonToken>().unwrap(), ButtonToken::Back);
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert!("mode:turbo".parse::<ButtonToken>().is_err());
        assert!("font:".parse::<ButtonToken>().is_err());
        assert!("".parse::<ButtonToken>().is_err());
    }

    #[test]
    fn reset_keeps_active_pack_only() {
        let mut session = UserSession::new(9);
        session.state = SessionState::ReadyToCreate;
        session.pending_text = Some("hi".into());
        session.active_pack = Some("hi_9_by_bot".into());
        session.revision = 4;
        session.reset();
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.pending_text.is_none());
        assert_eq!(session.active_pack.as_deref(), Some("hi_9_by_bot"));
        assert_eq!(session.revision, 4);
    }
}
