use super::AIModel;
use image::RgbImage;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ImageCaptionInput {
    pub image: Arc<RgbImage>,
}

pub type ImageCaptionOutput = String;
pub type ImageCaptionModel = AIModel<ImageCaptionInput, ImageCaptionOutput>;
