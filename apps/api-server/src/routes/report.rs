use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use report::{compose_pdf, QaReport, REPORT_FILE_NAME, REPORT_MIME_TYPE};
use uuid::Uuid;

#[tracing::instrument(skip(state))]
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (upload, answered) = state.sessions.report_inputs(id)?;

    let pdf = tokio::task::spawn_blocking(move || {
        compose_pdf(&QaReport {
            question: &answered.question,
            answer: &answered.answer,
            caption: &upload.caption,
            image: &upload.image,
        })
    })
    .await??;

    tracing::info!("report generated ({} bytes)", pdf.len());

    Ok((
        [
            (header::CONTENT_TYPE, REPORT_MIME_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", REPORT_FILE_NAME),
            ),
        ],
        pdf,
    ))
}
