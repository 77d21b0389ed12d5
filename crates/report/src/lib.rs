//! Single page PDF report of a visual question answering interaction.
//!
//! The page layout is fixed (letter size, origin at the bottom left, units in
//! points): a heading, the question, the answer, the caption, and the image
//! stretched to a 300x300 square below them. Long lines are not wrapped.

use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbImage};
use printpdf::{image_crate, BuiltinFont, Image, ImageTransform, Mm, PdfDocument, Pt};
use std::io::Cursor;

pub const REPORT_FILE_NAME: &str = "qa_report.pdf";
pub const REPORT_MIME_TYPE: &str = "application/pdf";

pub const HEADING: &str = "Visual Q&A Report";

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN_LEFT: f32 = 50.0;
const HEADING_FONT_SIZE: f32 = 16.0;
const BODY_FONT_SIZE: f32 = 12.0;
const LINE_SPACING: f32 = 30.0;
const IMAGE_SIDE: f32 = 300.0;
// pixel cap of the embedded square, image data is stored uncompressed
const MAX_IMAGE_PX: u32 = 400;

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("failed to encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to embed image: {0}")]
    EmbedImage(String),

    #[error("failed to write pdf: {0}")]
    Pdf(String),
}

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Clone, Copy)]
pub struct QaReport<'a> {
    pub question: &'a str,
    pub answer: &'a str,
    pub caption: &'a str,
    pub image: &'a RgbImage,
}

fn pt(value: f32) -> Mm {
    Mm::from(Pt(value))
}

/// Render `report` into an in-memory PDF document.
pub fn compose_pdf(report: &QaReport) -> ReportResult<Vec<u8>> {
    let (doc, page, layer) =
        PdfDocument::new(HEADING, pt(PAGE_WIDTH), pt(PAGE_HEIGHT), "Layer 1");
    let layer = doc.get_page(page).get_layer(layer);

    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ReportError::Pdf(e.to_string()))?;
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ReportError::Pdf(e.to_string()))?;

    layer.use_text(
        HEADING,
        HEADING_FONT_SIZE,
        pt(MARGIN_LEFT),
        pt(PAGE_HEIGHT - 50.0),
        &bold,
    );

    let text_y = PAGE_HEIGHT - 100.0;
    let lines = [
        format!("Question: {}", report.question),
        format!("Answer: {}", report.answer),
        format!("Caption: {}", report.caption),
    ];
    for (i, line) in lines.into_iter().enumerate() {
        layer.use_text(
            line,
            BODY_FONT_SIZE,
            pt(MARGIN_LEFT),
            pt(text_y - LINE_SPACING * i as f32),
            &regular,
        );
    }

    let (image, side_px) = embed_image(report.image)?;
    image.add_to_layer(
        layer,
        ImageTransform {
            translate_x: Some(pt(MARGIN_LEFT)),
            translate_y: Some(pt(text_y - 400.0)),
            // stretches `side_px` pixels over IMAGE_SIDE points
            dpi: Some(side_px as f32 * 72.0 / IMAGE_SIDE),
            ..Default::default()
        },
    );

    let bytes = doc
        .save_to_bytes()
        .map_err(|e| ReportError::Pdf(e.to_string()))?;
    tracing::debug!("composed report of {} bytes", bytes.len());
    Ok(bytes)
}

/// Square-scaled copy of `image`, never larger than the source needs.
fn embed_image(image: &RgbImage) -> ReportResult<(Image, u32)> {
    let side_px = image.width().max(image.height()).clamp(1, MAX_IMAGE_PX);
    let scaled = image::imageops::resize(image, side_px, side_px, FilterType::Triangle);

    // printpdf bundles its own `image` version, hand the pixels over as png
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(scaled).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    let decoded = image_crate::load_from_memory_with_format(&png, image_crate::ImageFormat::Png)
        .map_err(|e| ReportError::EmbedImage(e.to_string()))?;

    Ok((Image::from_dynamic_image(&decoded), side_px))
}
