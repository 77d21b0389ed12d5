use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, ImageFormat, RgbImage};

pub const IMAGE_SIZE: u32 = 384;

const MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const STD: [f32; 3] = [0.26862954, 0.261_302_6, 0.275_777_1];

#[derive(thiserror::Error, Debug)]
pub enum ImageDecodeError {
    #[error("unsupported image format: {0}, expected png or jpeg")]
    UnsupportedFormat(String),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode an uploaded png or jpeg into an rgb8 buffer.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ImageDecodeError> {
    let format = image::guess_format(bytes)?;
    if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(ImageDecodeError::UnsupportedFormat(
            format!("{:?}", format).to_lowercase(),
        ));
    }

    let image = image::load_from_memory_with_format(bytes, format)?;
    Ok(image.to_rgb8())
}

/// Resize to the vision encoder input and normalize, shape `[3, 384, 384]`.
pub fn image_to_tensor(image: &RgbImage, device: &Device) -> candle_core::Result<Tensor> {
    let resized = image::imageops::resize(image, IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom);
    let size = IMAGE_SIZE as usize;
    let data = Tensor::from_vec(resized.into_raw(), (size, size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?;
    let mean = Tensor::new(&MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&STD, &Device::Cpu)?.reshape((3, 1, 1))?;

    (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?
        .to_device(device)
}
