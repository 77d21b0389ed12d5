use crate::{
    session::{follow_up_questions, Answered},
    ApiError, ApiResult, AppState,
};
use ai::{
    blip::decode_image,
    image::{DynamicImage, ImageError, ImageFormat},
    ImageCaptionInput, VisualQaInput,
};
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{io::Cursor, sync::Arc};
use uuid::Uuid;

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUps {
    pub questions: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Captioned {
    pub caption: String,
    pub width: u32,
    pub height: u32,
    /// The selected question carried over from a previous image, with its
    /// answer for this one.
    pub question: Option<String>,
    pub answer: Option<String>,
    pub follow_up_questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionPayload {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question: String,
    pub answer: Option<String>,
    pub caption: String,
    pub follow_up_questions: Vec<String>,
}

pub async fn follow_ups() -> Json<FollowUps> {
    Json(FollowUps {
        questions: follow_up_questions(),
    })
}

pub async fn create(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let (id, created_at) = state.sessions.create();
    tracing::debug!("session {} created", id);
    (StatusCode::CREATED, Json(SessionCreated { id, created_at }))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.sessions.remove(id)?;
    tracing::debug!("session {} ended", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Only the upload's declared name is checked here, the content itself is
/// validated when decoding.
fn check_file_type(file_name: Option<&str>) -> ApiResult<()> {
    let Some(file_name) = file_name.filter(|name| !name.is_empty()) else {
        return Err(ApiError::UnsupportedFileType("file without a name".to_string()));
    };
    match mime_guess::from_path(file_name).first() {
        Some(mime) if mime == mime_guess::mime::IMAGE_PNG || mime == mime_guess::mime::IMAGE_JPEG => {
            Ok(())
        }
        _ => Err(ApiError::UnsupportedFileType(file_name.to_string())),
    }
}

async fn read_image_field(multipart: &mut Multipart) -> ApiResult<Vec<u8>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        check_file_type(field.file_name())?;
        return Ok(field.bytes().await?.to_vec());
    }
    Err(ApiError::MissingField(IMAGE_FIELD))
}

#[tracing::instrument(skip(state, multipart))]
pub async fn upload_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<Json<Captioned>> {
    // fails early for unknown sessions, before reading the body
    let question = state.sessions.question(id)?;

    let bytes = read_image_field(&mut multipart).await?;
    let image = tokio::task::spawn_blocking(move || decode_image(&bytes)).await??;
    let image = Arc::new(image);
    let (width, height) = image.dimensions();
    tracing::info!("image uploaded: {}x{}", width, height);

    // nothing is stored until every model call for this image succeeded
    let caption = state
        .ai
        .caption
        .process_single(ImageCaptionInput {
            image: image.clone(),
        })
        .await
        .map_err(ApiError::Model)?;

    let answered = if question.is_empty() {
        None
    } else {
        let answer = state
            .ai
            .vqa
            .process_single(VisualQaInput {
                image: image.clone(),
                question: question.clone(),
            })
            .await
            .map_err(ApiError::Model)?;
        tracing::info!("selected question answered for new image");
        Some(Answered { question, answer })
    };

    let (_, answered) = state
        .sessions
        .set_image(id, image, caption.clone(), answered)?;

    let (question, answer, follow_ups) = match answered {
        Some(Answered { question, answer }) => (Some(question), Some(answer), vec![]),
        None => (None, None, follow_up_questions()),
    };

    Ok(Json(Captioned {
        caption,
        width,
        height,
        question,
        answer,
        follow_up_questions: follow_ups,
    }))
}

pub async fn preview_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let upload = state.sessions.upload(id)?;

    let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ImageError> {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(upload.image.as_ref().clone())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    })
    .await?
    .map_err(|e| ApiError::Internal(format!("failed to encode preview: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

/// An empty question computes nothing and offers the follow-up prompts instead.
#[tracing::instrument(skip(state, payload))]
pub async fn ask(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuestionPayload>,
) -> ApiResult<Json<Answer>> {
    let question = payload.question.trim().to_string();
    let upload = state.sessions.select_question(id, &question)?;

    if question.is_empty() {
        return Ok(Json(Answer {
            question,
            answer: None,
            caption: upload.caption,
            follow_up_questions: follow_up_questions(),
        }));
    }

    let answer = state
        .ai
        .vqa
        .process_single(VisualQaInput {
            image: upload.image.clone(),
            question: question.clone(),
        })
        .await
        .map_err(ApiError::Model)?;
    tracing::info!("question answered");

    let answered = Answered {
        question: question.clone(),
        answer: answer.clone(),
    };
    if !state.sessions.set_answer(id, upload.id, answered)? {
        tracing::debug!("image or question changed while answering, answer discarded");
    }

    Ok(Json(Answer {
        question,
        answer: Some(answer),
        caption: upload.caption,
        follow_up_questions: vec![],
    }))
}
