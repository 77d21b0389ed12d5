use super::{
    blip_base_config, decode, generate, image_to_tensor, load_tokenizer, load_var_builder,
    QuestionEncoder, SEED, VQA_MODEL_ID,
};
use crate::resources::ModelSource;
use crate::traits::{VisualQaInput, VisualQaOutput};
use crate::Model;
use anyhow::{anyhow, bail};
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip;
use image::RgbImage;
use tokenizers::Tokenizer;
use tracing::debug;

/// BLIP visual question answering model.
///
/// The image goes through the vision encoder, the question is encoded while
/// cross-attending the image, and the answer decoder cross-attends the question
/// embeddings.
pub struct BLIPVqa {
    tokenizer: Tokenizer,
    // vision_model.* and text_decoder.* of the vqa checkpoint
    model: blip::BlipForConditionalGeneration,
    question_encoder: QuestionEncoder,
    logits_processor: LogitsProcessor,
    device: Device,
    max_new_tokens: usize,
}

impl Model for BLIPVqa {
    type Item = VisualQaInput;
    type Output = VisualQaOutput;

    fn batch_size_limit(&self) -> usize {
        1
    }

    async fn process(
        &mut self,
        items: Vec<Self::Item>,
    ) -> anyhow::Result<Vec<anyhow::Result<Self::Output>>> {
        if items.len() > self.batch_size_limit() {
            bail!("too many items");
        }

        Ok(items
            .into_iter()
            .map(|item| self.get_answer(&item.image, &item.question))
            .collect())
    }
}

impl BLIPVqa {
    pub fn new(source: &ModelSource, max_new_tokens: usize) -> anyhow::Result<Self> {
        let files = source.resolve(VQA_MODEL_ID)?;
        let device = crate::device();
        let config = blip_base_config();

        let tokenizer = load_tokenizer(&files)?;
        let vb = load_var_builder(&files, &device)?;
        let question_encoder = QuestionEncoder::new(&config.text_config, vb.pp("text_encoder"))?;
        let model = blip::BlipForConditionalGeneration::new(&config, vb)?;

        Ok(Self {
            tokenizer,
            model,
            question_encoder,
            logits_processor: LogitsProcessor::new(SEED, None, None),
            device,
            max_new_tokens,
        })
    }

    pub fn get_answer(&mut self, image: &RgbImage, question: &str) -> anyhow::Result<String> {
        let question = question.trim();
        if question.is_empty() {
            bail!("question is empty");
        }
        debug!("answering question: {}", question);

        let image_embeds = image_to_tensor(image, &self.device)?
            .unsqueeze(0)?
            .apply(self.model.vision_model())?;

        let encoding = self
            .tokenizer
            .encode(question, true)
            .map_err(|e| anyhow!("failed to tokenize question: {}", e))?;
        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let question_embeds = self.question_encoder.forward(&input_ids, &image_embeds)?;

        let token_ids = generate(
            self.model.text_decoder(),
            &question_embeds,
            &mut self.logits_processor,
            self.max_new_tokens,
            &self.device,
        )?;

        decode(&self.tokenizer, &token_ids)
    }
}
