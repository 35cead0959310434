use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use super::{PackStore, TerminalKind, UpstreamError, UpstreamPack};
use crate::config::TelegramConfig;
use crate::error::AppResult;
use crate::models::RenderedSticker;

const STICKER_FIELD: &str = "sticker0";

/// Sticker pack store backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramPackStore {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StickerSet {
    name: String,
    title: String,
    #[serde(default)]
    stickers: Vec<serde_json::Value>,
}

impl TelegramPackStore {
    pub fn new(config: &TelegramConfig, attempt_timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    fn sticker_form(
        owner: i64,
        name: &str,
        sticker: &RenderedSticker,
    ) -> Result<Form, UpstreamError> {
        let part = Part::bytes(sticker.bytes().to_vec())
            .file_name(format!("sticker.{}", sticker.format().extension()))
            .mime_str(sticker.format().content_type())
            .map_err(|e| UpstreamError::terminal(TerminalKind::Other, e.to_string()))?;

        Ok(Form::new()
            .text("user_id", owner.to_string())
            .text("name", name.to_string())
            .part(STICKER_FIELD, part))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status().as_u16();
        let body: ApiResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(e) if status >= 500 => {
                return Err(UpstreamError::transient(format!("HTTP {}: {}", status, e)))
            }
            Err(e) => return Err(classify_transport(e)),
        };

        if body.ok {
            if let Some(result) = body.result {
                return Ok(result);
            }
        }

        Err(classify_failure(
            body.error_code.unwrap_or(status),
            body.description.as_deref().unwrap_or("unknown error"),
            body.parameters.and_then(|p| p.retry_after),
        ))
    }
}

fn input_sticker(emoji: &str) -> String {
    json!({
        "sticker": format!("attach://{}", STICKER_FIELD),
        "format": "static",
        "emoji_list": [emoji],
    })
    .to_string()
}

fn classify_transport(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        UpstreamError::transient(e.to_string())
    } else {
        UpstreamError::terminal(TerminalKind::Other, e.to_string())
    }
}

/// Maps a Bot API error onto the retry taxonomy.
pub fn classify_failure(code: u16, description: &str, retry_after: Option<u64>) -> UpstreamError {
    if code == 429 || code >= 500 {
        return UpstreamError::Transient {
            message: format!("{} {}", code, description),
            retry_after: retry_after.map(Duration::from_secs),
        };
    }

    let upper = description.to_ascii_uppercase();
    let kind = if upper.contains("STICKERSET_INVALID") {
        TerminalKind::PackInvalid
    } else if upper.contains("STICKERS_TOO_MUCH") {
        TerminalKind::PackFull
    } else if upper.contains("STICKER_EMOJI_INVALID") {
        TerminalKind::EmojiInvalid
    } else if upper.contains("PEER_ID_INVALID")
        || upper.contains("USER_ID_INVALID")
        || upper.contains("USER NOT FOUND")
    {
        TerminalKind::OwnerInvalid
    } else {
        TerminalKind::Other
    };

    UpstreamError::terminal(kind, format!("{} {}", code, description))
}

#[async_trait]
impl PackStore for TelegramPackStore {
    async fn get_pack(&self, name: &str) -> Result<Option<UpstreamPack>, UpstreamError> {
        let request = self.http.get(self.url("getStickerSet")).query(&[("name", name)]);
        match self.send::<StickerSet>(request).await {
            Ok(set) => Ok(Some(UpstreamPack {
                name: set.name,
                title: set.title,
                sticker_count: set.stickers.len() as u32,
            })),
            Err(UpstreamError::Terminal {
                kind: TerminalKind::PackInvalid,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_pack(
        &self,
        owner: i64,
        name: &str,
        title: &str,
        sticker: &RenderedSticker,
        emoji: &str,
    ) -> Result<(), UpstreamError> {
        let form = Self::sticker_form(owner, name, sticker)?
            .text("title", title.to_string())
            .text("sticker_type", "regular")
            .text("stickers", format!("[{}]", input_sticker(emoji)));

        let request = self.http.post(self.url("createNewStickerSet")).multipart(form);
        let _: bool = self.send(request).await?;
        tracing::info!(pack = %name, owner, "Created sticker pack");
        Ok(())
    }

    async fn add_sticker(
        &self,
        owner: i64,
        name: &str,
        sticker: &RenderedSticker,
        emoji: &str,
    ) -> Result<(), UpstreamError> {
        let form = Self::sticker_form(owner, name, sticker)?.text("sticker", input_sticker(emoji));

        let request = self.http.post(self.url("addStickerToSet")).multipart(form);
        let _: bool = self.send(request).await?;
        tracing::debug!(pack = %name, owner, "Added sticker to pack");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_are_transient_with_retry_after() {
        let err = classify_failure(429, "Too Many Requests: retry after 5", Some(5));
        assert_eq!(
            err,
            UpstreamError::Transient {
                message: "429 Too Many Requests: retry after 5".into(),
                retry_after: Some(Duration::from_secs(5)),
            }
        );
        assert!(matches!(
            classify_failure(502, "Bad Gateway", None),
            UpstreamError::Transient { retry_after: None, .. }
        ));
    }

    #[test]
    fn known_descriptions_map_to_terminal_kinds() {
        let kind = |description: &str| match classify_failure(400, description, None) {
            UpstreamError::Terminal { kind, .. } => kind,
            other => panic!("expected terminal, got {:?}", other),
        };
        assert_eq!(kind("Bad Request: STICKERSET_INVALID"), TerminalKind::PackInvalid);
        assert_eq!(kind("Bad Request: STICKERS_TOO_MUCH"), TerminalKind::PackFull);
        assert_eq!(kind("Bad Request: STICKER_EMOJI_INVALID"), TerminalKind::EmojiInvalid);
        assert_eq!(kind("Bad Request: PEER_ID_INVALID"), TerminalKind::OwnerInvalid);
        assert_eq!(kind("Bad Request: something else"), TerminalKind::Other);
    }

    #[test]
    fn input_sticker_references_the_uploaded_part() {
        let value: serde_json::Value = serde_json::from_str(&input_sticker("😊")).unwrap();
        assert_eq!(value["sticker"], "attach://sticker0");
        assert_eq!(value["format"], "static");
        assert_eq!(value["emoji_list"][0], "😊");
    }
}
