//! Text encoder of the BLIP VQA model.
//!
//! A bidirectional BERT stack whose layers also cross-attend to the image
//! embeddings. Weight names follow the `text_encoder.*` tensors of the
//! `Salesforce/blip-vqa-base` checkpoint.

use candle_core::{Module, Result, Tensor};
use candle_nn::{
    embedding, layer_norm, linear, Activation, Embedding, LayerNorm, Linear, VarBuilder,
};
use candle_transformers::models::blip_text::Config;

#[derive(Debug, Clone)]
struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl Embeddings {
    fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            word_embeddings: embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("word_embeddings"))?,
            position_embeddings: embedding(
                cfg.max_position_embeddings,
                cfg.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            layer_norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let seq_len = input_ids.dim(1)?;
        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let positions = self.position_embeddings.forward(&position_ids)?;
        self.word_embeddings
            .forward(input_ids)?
            .broadcast_add(&positions)?
            .apply(&self.layer_norm)
    }
}

#[derive(Debug, Clone)]
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    fn new(cfg: &Config, kv_size: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = cfg.hidden_size / cfg.num_attention_heads;
        Ok(Self {
            query: linear(cfg.hidden_size, cfg.hidden_size, vb.pp("query"))?,
            key: linear(kv_size, cfg.hidden_size, vb.pp("key"))?,
            value: linear(kv_size, cfg.hidden_size, vb.pp("value"))?,
            num_heads: cfg.num_attention_heads,
            head_dim,
            scale: 1f64 / (head_dim as f64).sqrt(),
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (b_size, seq_len, _) = xs.dims3()?;
        xs.reshape((b_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    // No attention mask: questions are encoded one at a time, without padding.
    fn forward(&self, xs: &Tensor, kv: &Tensor) -> Result<Tensor> {
        let (b_size, seq_len, hidden_size) = xs.dims3()?;
        let query = self.split_heads(&self.query.forward(xs)?)?;
        let key = self.split_heads(&self.key.forward(kv)?)?;
        let value = self.split_heads(&self.value.forward(kv)?)?;

        let scores = (query.matmul(&key.t()?)? * self.scale)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        probs
            .matmul(&value)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b_size, seq_len, hidden_size))
    }
}

/// Dense projection followed by residual add and LayerNorm.
#[derive(Debug, Clone)]
struct ResidualOutput {
    dense: Linear,
    layer_norm: LayerNorm,
}

impl ResidualOutput {
    fn new(in_size: usize, cfg: &Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dense: linear(in_size, cfg.hidden_size, vb.pp("dense"))?,
            layer_norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, xs: &Tensor, residual: &Tensor) -> Result<Tensor> {
        (self.dense.forward(xs)? + residual)?.apply(&self.layer_norm)
    }
}

#[derive(Debug, Clone)]
struct Layer {
    self_attention: Attention,
    self_output: ResidualOutput,
    cross_attention: Attention,
    cross_output: ResidualOutput,
    intermediate: Linear,
    intermediate_act: Activation,
    output: ResidualOutput,
}

impl Layer {
    fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attention: Attention::new(cfg, cfg.hidden_size, vb.pp("attention.self"))?,
            self_output: ResidualOutput::new(cfg.hidden_size, cfg, vb.pp("attention.output"))?,
            cross_attention: Attention::new(
                cfg,
                cfg.encoder_hidden_size,
                vb.pp("crossattention.self"),
            )?,
            cross_output: ResidualOutput::new(
                cfg.hidden_size,
                cfg,
                vb.pp("crossattention.output"),
            )?,
            intermediate: linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                vb.pp("intermediate.dense"),
            )?,
            intermediate_act: cfg.hidden_act,
            output: ResidualOutput::new(cfg.intermediate_size, cfg, vb.pp("output"))?,
        })
    }

    fn forward(&self, xs: &Tensor, image_embeds: &Tensor) -> Result<Tensor> {
        let attn = self.self_attention.forward(xs, xs)?;
        let xs = self.self_output.forward(&attn, xs)?;

        let cross = self.cross_attention.forward(&xs, image_embeds)?;
        let xs = self.cross_output.forward(&cross, &xs)?;

        let hidden = self.intermediate.forward(&xs)?.apply(&self.intermediate_act)?;
        self.output.forward(&hidden, &xs)
    }
}

#[derive(Debug, Clone)]
pub struct QuestionEncoder {
    embeddings: Embeddings,
    layers: Vec<Layer>,
}

impl QuestionEncoder {
    pub fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let embeddings = Embeddings::new(cfg, vb.pp("embeddings"))?;
        let vb_layers = vb.pp("encoder.layer");
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| Layer::new(cfg, vb_layers.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { embeddings, layers })
    }

    /// `input_ids`: `[1, seq_len]`, `image_embeds`: `[1, patches, encoder_hidden_size]`.
    /// Returns the question embeddings `[1, seq_len, hidden_size]`.
    pub fn forward(&self, input_ids: &Tensor, image_embeds: &Tensor) -> Result<Tensor> {
        let mut xs = self.embeddings.forward(input_ids)?;
        for layer in self.layers.iter() {
            xs = layer.forward(&xs, image_embeds)?;
        }
        Ok(xs)
    }
}
