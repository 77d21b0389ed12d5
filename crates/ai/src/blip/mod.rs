mod preprocess;
mod question_encoder;
mod vqa;

pub use preprocess::{decode_image, image_to_tensor, ImageDecodeError, IMAGE_SIZE};
pub use question_encoder::QuestionEncoder;
pub use vqa::BLIPVqa;

use crate::resources::{ModelFiles, ModelSource};
use crate::traits::{ImageCaptionInput, ImageCaptionOutput};
use crate::Model;
use anyhow::{anyhow, bail};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip::VisionConfig;
use candle_transformers::models::{blip, blip_text};
use image::RgbImage;
use tokenizers::Tokenizer;
use tracing::debug;

pub const CAPTION_MODEL_ID: &str = "Salesforce/blip-image-captioning-base";
pub const VQA_MODEL_ID: &str = "Salesforce/blip-vqa-base";

pub const DEFAULT_MAX_NEW_TOKENS: usize = 30;

const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;
const SEED: u64 = 1337;

pub fn blip_base_config() -> blip::Config {
    let text_config = blip_text::Config {
        vocab_size: 30524,
        hidden_size: 768,
        encoder_hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 768,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        max_position_embeddings: 512,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-12,
        is_decoder: true,
    };
    let vision_config = VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: 384,
        patch_size: 16,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-5,
    };

    blip::Config {
        text_config,
        vision_config,
        projection_dim: 512,
        image_text_hidden_size: 256,
    }
}

fn load_tokenizer(files: &ModelFiles) -> anyhow::Result<Tokenizer> {
    Tokenizer::from_file(&files.tokenizer)
        .map_err(|e| anyhow!("failed to initialize tokenizer: {}", e))
}

fn load_var_builder(files: &ModelFiles, device: &Device) -> anyhow::Result<VarBuilder<'static>> {
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(std::slice::from_ref(&files.weights), DType::F32, device)?
    };
    Ok(vb)
}

/// Greedy decoding from `[DEC]` until `[SEP]` or `max_new_tokens`.
///
/// `next_token` gets every id generated so far, `[DEC]` included, and the
/// number of ids the decoder has not seen yet. The returned ids do not
/// contain the leading `[DEC]`.
fn greedy_decode(
    max_new_tokens: usize,
    mut next_token: impl FnMut(&[u32], usize) -> anyhow::Result<u32>,
) -> anyhow::Result<Vec<u32>> {
    let mut token_ids = vec![BOS_TOKEN_ID];
    for index in 0..max_new_tokens {
        let context_size = if index > 0 { 1 } else { token_ids.len() };
        let token = next_token(&token_ids, context_size)?;
        if token == SEP_TOKEN_ID {
            break;
        }
        token_ids.push(token);
    }

    token_ids.remove(0);
    Ok(token_ids)
}

/// Greedy decoding with the BLIP text decoder, see [`greedy_decode`].
fn generate(
    decoder: &mut blip_text::TextLMHeadModel,
    encoder_hidden_states: &Tensor,
    logits_processor: &mut LogitsProcessor,
    max_new_tokens: usize,
    device: &Device,
) -> anyhow::Result<Vec<u32>> {
    // we need this to make multi time generation work
    decoder.reset_kv_cache();

    greedy_decode(max_new_tokens, |token_ids, context_size| {
        let start_pos = token_ids.len().saturating_sub(context_size);
        let input_ids = Tensor::new(&token_ids[start_pos..], device)?.unsqueeze(0)?;
        let logits = decoder.forward(&input_ids, encoder_hidden_states)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;
        Ok(logits_processor.sample(&logits)?)
    })
}

fn decode(tokenizer: &Tokenizer, token_ids: &[u32]) -> anyhow::Result<String> {
    let text = tokenizer
        .decode(token_ids, true)
        .map_err(|e| anyhow!("failed to decode tokens: {}", e))?;
    Ok(text.trim().to_string())
}

/// BLIP image captioning model.
pub struct BLIP {
    tokenizer: Tokenizer,
    model: blip::BlipForConditionalGeneration,
    logits_processor: LogitsProcessor,
    device: Device,
    max_new_tokens: usize,
}

impl Model for BLIP {
    type Item = ImageCaptionInput;
    type Output = ImageCaptionOutput;

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
            .map(|item| self.get_caption(&item.image))
            .collect())
    }
}

impl BLIP {
    pub fn new(source: &ModelSource, max_new_tokens: usize) -> anyhow::Result<Self> {
        let files = source.resolve(CAPTION_MODEL_ID)?;
        let device = crate::device();

        let tokenizer = load_tokenizer(&files)?;
        let vb = load_var_builder(&files, &device)?;
        let model = blip::BlipForConditionalGeneration::new(&blip_base_config(), vb)?;

        Ok(Self {
            tokenizer,
            model,
            logits_processor: LogitsProcessor::new(SEED, None, None),
            device,
            max_new_tokens,
        })
    }

    pub fn get_caption(&mut self, image: &RgbImage) -> anyhow::Result<String> {
        debug!(
            "generating caption for {}x{} image",
            image.width(),
            image.height()
        );
        let image_embeds = image_to_tensor(image, &self.device)?
            .unsqueeze(0)?
            .apply(self.model.vision_model())?;

        let token_ids = generate(
            self.model.text_decoder(),
            &image_embeds,
            &mut self.logits_processor,
            self.max_new_tokens,
            &self.device,
        )?;

        decode(&self.tokenizer, &token_ids)
    }
}
