use super::get_routes;
use crate::{AIHandler, AppState};
use ai::{
    image::{DynamicImage, ImageFormat, Rgb, RgbImage},
    AIModel, ImageCaptionInput, ImageCaptionModel, Model, VisualQaInput,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tower::ServiceExt;

const BOUNDARY: &str = "ask-image-test-boundary";

struct FakeCaption;

impl Model for FakeCaption {
    type Item = ImageCaptionInput;
    type Output = String;

    async fn process(
        &mut self,
        items: Vec<Self::Item>,
    ) -> anyhow::Result<Vec<anyhow::Result<Self::Output>>> {
        Ok(items
            .into_iter()
            .map(|item| {
                let (w, h) = item.image.dimensions();
                Ok(format!("a {}x{} test picture", w, h))
            })
            .collect())
    }

    fn batch_size_limit(&self) -> usize {
        1
    }
}

struct FailingCaption;

impl Model for FailingCaption {
    type Item = ImageCaptionInput;
    type Output = String;

    async fn process(
        &mut self,
        items: Vec<Self::Item>,
    ) -> anyhow::Result<Vec<anyhow::Result<Self::Output>>> {
        Ok(items
            .into_iter()
            .map(|_| Err(anyhow::anyhow!("caption decoder failed")))
            .collect())
    }

    fn batch_size_limit(&self) -> usize {
        1
    }
}

struct FakeVqa {
    calls: Arc<AtomicUsize>,
}

impl Model for FakeVqa {
    type Item = VisualQaInput;
    type Output = String;

    async fn process(
        &mut self,
        items: Vec<Self::Item>,
    ) -> anyhow::Result<Vec<anyhow::Result<Self::Output>>> {
        Ok(items
            .into_iter()
            .map(|item| {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("answer to {}", item.question))
            })
            .collect())
    }

    fn batch_size_limit(&self) -> usize {
        1
    }
}

struct TestApp {
    router: Router,
    vqa_calls: Arc<AtomicUsize>,
}

fn test_app() -> TestApp {
    let caption = AIModel::new("fake-caption", || async { Ok(FakeCaption) }, None).unwrap();
    test_app_with(caption, 1024 * 1024)
}

fn test_app_with(caption: ImageCaptionModel, max_upload_bytes: usize) -> TestApp {
    let vqa_calls = Arc::new(AtomicUsize::new(0));
    let vqa = {
        let calls = vqa_calls.clone();
        AIModel::new(
            "fake-vqa",
            move || {
                let calls = calls.clone();
                async move { Ok(FakeVqa { calls }) }
            },
            None,
        )
        .unwrap()
    };

    let state = AppState::new(AIHandler { caption, vqa });
    TestApp {
        router: get_routes(state, max_upload_bytes),
        vqa_calls,
    }
}

fn encoded(format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(32, 16, |x, y| Rgb([x as u8 * 8, y as u8 * 16, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

fn png_bytes() -> Vec<u8> {
    encoded(ImageFormat::Png)
}

fn multipart_request(uri: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    multipart_request_with(uri, Some(file_name), bytes)
}

fn multipart_request_with(uri: &str, file_name: Option<&str>, bytes: &[u8]) -> Request<Body> {
    let disposition = match file_name {
        Some(file_name) => format!("form-data; name=\"image\"; filename=\"{file_name}\""),
        None => "form-data; name=\"image\"".to_string(),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: Method, uri: &str, json: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn create_session(app: &TestApp) -> String {
    let response = send(app, empty_request(Method::POST, "/api/sessions")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    json["id"].as_str().unwrap().to_string()
}

async fn upload_png(app: &TestApp, id: &str) -> Value {
    let response = send(
        app,
        multipart_request(&format!("/api/sessions/{id}/image"), "photo.png", &png_bytes()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn ask(app: &TestApp, id: &str, question: &str) -> Response {
    send(
        app,
        json_request(
            Method::POST,
            &format!("/api/sessions/{id}/question"),
            serde_json::json!({ "question": question }),
        ),
    )
    .await
}

#[test_log::test(tokio::test)]
async fn serves_page() {
    let app = test_app();
    let response = send(&app, empty_request(Method::GET, "/")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("Ask Your Image"));
    assert!(html.contains("Upload and ask"));
}

#[test_log::test(tokio::test)]
async fn lists_follow_ups() {
    let app = test_app();
    let response = send(&app, empty_request(Method::GET, "/api/follow-ups")).await;

    let json = body_json(response).await;
    let questions = json["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 6);
    assert_eq!(questions[0], "What is happening in the image?");
}

#[test_log::test(tokio::test)]
async fn upload_ask_and_download_report() {
    let app = test_app();
    let id = create_session(&app).await;

    let captioned = upload_png(&app, &id).await;
    assert_eq!(captioned["caption"], "a 32x16 test picture");
    assert_eq!(captioned["width"], 32);
    assert_eq!(captioned["height"], 16);
    assert_eq!(captioned["followUpQuestions"].as_array().unwrap().len(), 6);

    let response = ask(&app, &id, "  What colour is it?  ").await;
    assert_eq!(response.status(), StatusCode::OK);
    let answered = body_json(response).await;
    assert_eq!(answered["question"], "What colour is it?");
    assert_eq!(answered["answer"], "answer to What colour is it?");
    assert_eq!(answered["caption"], "a 32x16 test picture");
    assert!(answered["followUpQuestions"].as_array().unwrap().is_empty());

    let response = send(&app, empty_request(Method::GET, &format!("/api/sessions/{id}/report"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("qa_report.pdf"));
    let pdf = body_bytes(response).await;
    assert!(pdf.starts_with(b"%PDF-"));
}

#[test_log::test(tokio::test)]
async fn empty_question_offers_follow_ups_without_answering() {
    let app = test_app();
    let id = create_session(&app).await;
    upload_png(&app, &id).await;

    let response = ask(&app, &id, "   ").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert!(json["answer"].is_null());
    assert_eq!(json["caption"], "a 32x16 test picture");
    assert_eq!(json["followUpQuestions"].as_array().unwrap().len(), 6);
    assert_eq!(app.vqa_calls.load(Ordering::SeqCst), 0);

    // nothing was answered, so there is nothing to report
    let response = send(&app, empty_request(Method::GET, &format!("/api/sessions/{id}/report"))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[test_log::test(tokio::test)]
async fn question_before_upload_is_a_conflict() {
    let app = test_app();
    let id = create_session(&app).await;

    let response = ask(&app, &id, "What is this?").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(app.vqa_calls.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn new_upload_answers_selected_question() {
    let app = test_app();
    let id = create_session(&app).await;
    upload_png(&app, &id).await;
    assert_eq!(ask(&app, &id, "Where is it?").await.status(), StatusCode::OK);
    assert_eq!(app.vqa_calls.load(Ordering::SeqCst), 1);

    let captioned = upload_png(&app, &id).await;
    assert_eq!(captioned["question"], "Where is it?");
    assert_eq!(captioned["answer"], "answer to Where is it?");
    assert!(captioned["followUpQuestions"].as_array().unwrap().is_empty());
    assert_eq!(app.vqa_calls.load(Ordering::SeqCst), 2);

    let response = send(&app, empty_request(Method::GET, &format!("/api/sessions/{id}/report"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[test_log::test(tokio::test)]
async fn empty_question_withdraws_report() {
    let app = test_app();
    let id = create_session(&app).await;
    upload_png(&app, &id).await;
    assert_eq!(ask(&app, &id, "Where is it?").await.status(), StatusCode::OK);

    assert_eq!(ask(&app, &id, "").await.status(), StatusCode::OK);

    let response = send(&app, empty_request(Method::GET, &format!("/api/sessions/{id}/report"))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(app.vqa_calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn failed_caption_keeps_session_unchanged() {
    let caption = AIModel::new("failing-caption", || async { Ok(FailingCaption) }, None).unwrap();
    let app = test_app_with(caption, 1024 * 1024);
    let id = create_session(&app).await;

    let response = send(
        &app,
        multipart_request(&format!("/api/sessions/{id}/image"), "photo.png", &png_bytes()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("caption decoder failed"));

    let response = send(&app, empty_request(Method::GET, &format!("/api/sessions/{id}/image"))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    assert_eq!(ask(&app, &id, "what?").await.status(), StatusCode::CONFLICT);
    assert_eq!(app.vqa_calls.load(Ordering::SeqCst), 0);

    let response = send(&app, empty_request(Method::GET, &format!("/api/sessions/{id}/report"))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[test_log::test(tokio::test)]
async fn accepts_jpeg_upload() {
    let app = test_app();
    let id = create_session(&app).await;

    let response = send(
        &app,
        multipart_request(
            &format!("/api/sessions/{id}/image"),
            "photo.JPG",
            &encoded(ImageFormat::Jpeg),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["caption"], "a 32x16 test picture");
}

#[test_log::test(tokio::test)]
async fn rejects_oversized_upload() {
    let caption = AIModel::new("fake-caption", || async { Ok(FakeCaption) }, None).unwrap();
    let app = test_app_with(caption, 1024);
    let id = create_session(&app).await;

    let response = send(
        &app,
        multipart_request(&format!("/api/sessions/{id}/image"), "photo.png", &[0u8; 8 * 1024]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = send(&app, empty_request(Method::GET, &format!("/api/sessions/{id}/image"))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[test_log::test(tokio::test)]
async fn previews_uploaded_image() {
    let app = test_app();
    let id = create_session(&app).await;

    let uri = format!("/api/sessions/{id}/image");
    let response = send(&app, empty_request(Method::GET, &uri)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    upload_png(&app, &id).await;
    let response = send(&app, empty_request(Method::GET, &uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let png = body_bytes(response).await;
    assert!(png.starts_with(b"\x89PNG"));
}

#[test_log::test(tokio::test)]
async fn rejects_invalid_uploads() {
    let app = test_app();
    let id = create_session(&app).await;
    let uri = format!("/api/sessions/{id}/image");

    let response = send(&app, multipart_request(&uri, "anim.gif", b"GIF89a")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, multipart_request_with(&uri, None, &png_bytes())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, multipart_request(&uri, "photo.png", b"not really a png")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("image"));
}

#[test_log::test(tokio::test)]
async fn unknown_and_ended_sessions_are_not_found() {
    let app = test_app();

    let response = ask(&app, "00000000-0000-0000-0000-000000000000", "hi").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let id = create_session(&app).await;
    let response = send(&app, empty_request(Method::DELETE, &format!("/api/sessions/{id}"))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &app,
        multipart_request(&format!("/api/sessions/{id}/image"), "photo.png", &png_bytes()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
