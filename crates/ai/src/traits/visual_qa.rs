use super::AIModel;
use image::RgbImage;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct VisualQaInput {
    pub image: Arc<RgbImage>,
    pub question: String,
}

pub type VisualQaOutput = String;
pub type VisualQaModel = AIModel<VisualQaInput, VisualQaOutput>;
