use crate::config::ServerConfig;
use ai::{
    blip::{BLIPVqa, BLIP, CAPTION_MODEL_ID, VQA_MODEL_ID},
    AIModel, ImageCaptionModel, ModelSource, VisualQaModel,
};

#[derive(Clone, Debug)]
pub struct AIHandler {
    pub caption: ImageCaptionModel,
    pub vqa: VisualQaModel,
}

pub fn init_ai_handlers(config: &ServerConfig) -> anyhow::Result<AIHandler> {
    let source = ModelSource::new(config.resources_dir.clone(), config.allow_model_download);
    let max_new_tokens = config.max_new_tokens;
    let offload_duration = Some(config.model_offload);

    let source_clone = source.clone();
    let caption = AIModel::new(
        CAPTION_MODEL_ID,
        move || {
            let source = source_clone.clone();
            async move { BLIP::new(&source, max_new_tokens) }
        },
        offload_duration,
    )?;

    let source_clone = source.clone();
    let vqa = AIModel::new(
        VQA_MODEL_ID,
        move || {
            let source = source_clone.clone();
            async move { BLIPVqa::new(&source, max_new_tokens) }
        },
        offload_duration,
    )?;

    Ok(AIHandler { caption, vqa })
}
