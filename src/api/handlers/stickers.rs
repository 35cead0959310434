use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::{DialogueEvent, MenuButton, QuotaStatus, RenderedSticker, StickerPack, StyleRequest},
    services::stickers::BotReply,
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventRequest {
    Text { text: String },
    Button { token: String },
}

#[derive(Debug, Serialize)]
pub struct StickerPayload {
    pub format: &'static str,
    pub byte_len: usize,
    pub data: String,
}

impl From<&RenderedSticker> for StickerPayload {
    fn from(sticker: &RenderedSticker) -> Self {
        Self {
            format: sticker.format().extension(),
            byte_len: sticker.byte_len(),
            data: STANDARD.encode(sticker.bytes()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub text: String,
    pub buttons: Vec<MenuButton>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticker: Option<StickerPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_attach_link: Option<String>,
}

impl From<BotReply> for ReplyResponse {
    fn from(reply: BotReply) -> Self {
        Self {
            text: reply.text,
            buttons: reply.buttons,
            sticker: reply.sticker.as_ref().map(StickerPayload::from),
            manual_attach_link: reply.manual_attach_link,
        }
    }
}

pub async fn post_event(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<EventRequest>,
) -> AppResult<Json<ReplyResponse>> {
    let event = match req {
        EventRequest::Text { text } => DialogueEvent::Text(text),
        EventRequest::Button { token } => DialogueEvent::Button(token.parse()?),
    };

    let reply = state.stickers.handle_event(user_id, event).await?;
    Ok(Json(reply.into()))
}

pub async fn post_photo(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    mut multipart: Multipart,
) -> AppResult<Json<ReplyResponse>> {
    let mut photo = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("photo") {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            photo = Some(data);
            break;
        }
    }

    let photo = photo.ok_or_else(|| AppError::BadRequest("Missing photo field".to_string()))?;
    tracing::debug!(user_id, bytes = photo.len(), "Photo received");

    let reply = state
        .stickers
        .handle_event(user_id, DialogueEvent::Photo(photo))
        .await?;
    Ok(Json(reply.into()))
}

pub async fn get_quota(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<QuotaStatus>> {
    let status = state.stickers.quota_status(user_id).await?;
    Ok(Json(status))
}

pub async fn get_packs(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Vec<StickerPack>>> {
    let packs = state.stickers.user_packs(user_id).await?;
    Ok(Json(packs))
}

pub async fn post_preview(
    State(state): State<AppState>,
    Json(req): Json<StyleRequest>,
) -> AppResult<Json<StickerPayload>> {
    let sticker = state.stickers.preview(req).await?;
    Ok(Json(StickerPayload::from(&sticker)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_bodies_are_tagged_by_type() {
        let text: EventRequest = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert!(matches!(text, EventRequest::Text { text } if text == "hi"));

        let button: EventRequest =
            serde_json::from_str(r#"{"type":"button","token":"mode:advanced"}"#).unwrap();
        assert!(matches!(button, EventRequest::Button { token } if token == "mode:advanced"));

        assert!(serde_json::from_str::<EventRequest>(r#"{"type":"photo"}"#).is_err());
    }

    #[test]
    fn reply_omits_absent_sticker() {
        let body = serde_json::to_value(ReplyResponse::from(BotReply {
            text: "Send the sticker text.".into(),
            ..BotReply::default()
        }))
        .unwrap();
        assert!(body.get("sticker").is_none());
        assert!(body.get("manual_attach_link").is_none());
        assert_eq!(body["buttons"], serde_json::json!([]));
    }

    #[test]
    fn sticker_payload_is_base64() {
        let sticker = RenderedSticker::new(b"RIFF\0\0\0\0WEBP".to_vec(), crate::models::StickerFormat::WebP);
        let payload = StickerPayload::from(&sticker);
        assert_eq!(payload.format, "webp");
        assert_eq!(payload.byte_len, 12);
        assert_eq!(STANDARD.decode(payload.data).unwrap(), sticker.bytes());
    }
}
