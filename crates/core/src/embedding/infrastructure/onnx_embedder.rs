/// EfficientNet-B0 feature extractor using ONNX Runtime.
///
/// The model is the classifier-less backbone: global average pool output,
/// 1280 values per crop.
use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;

use crate::embedding::domain::embedder::Embedder;
use crate::embedding::domain::embedding::EmbeddingVector;
use crate::shared::frame::Frame;
use crate::shared::onnx_session::load_session;
use crate::shared::BoxError;

const RESIZE_SHORT_SIDE: u32 = 256;
const INPUT_SIZE: u32 = 224;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub struct OnnxEmbedder {
    session: Mutex<ort::session::Session>,
}

impl OnnxEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path)?;
        log::info!("Loaded embedder {}", model_path.display());
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, crop: &Frame) -> Result<EmbeddingVector, BoxError> {
        let tensor = preprocess(crop)?;
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        let features = outputs[0].try_extract_array::<f32>()?;
        let values: Vec<f32> = features.iter().copied().collect();

        EmbeddingVector::from_raw(values).ok_or_else(|| "embedder produced a zero vector".into())
    }
}

/// Resize the shorter side to 256, center-crop 224x224, ImageNet
/// normalization, NCHW layout.
fn preprocess(crop: &Frame) -> Result<ndarray::Array4<f32>, BoxError> {
    if crop.channels() != 3 || crop.width() == 0 || crop.height() == 0 {
        return Err(format!(
            "embedder expects a non-empty RGB crop, got {}x{}x{}",
            crop.width(),
            crop.height(),
            crop.channels()
        )
        .into());
    }
    let image = RgbImage::from_raw(crop.width(), crop.height(), crop.data().to_vec())
        .ok_or("crop buffer does not match its dimensions")?;

    let (w, h) = (crop.width() as f64, crop.height() as f64);
    let scale = RESIZE_SHORT_SIDE as f64 / w.min(h);
    let new_w = ((w * scale).round() as u32).max(INPUT_SIZE);
    let new_h = ((h * scale).round() as u32).max(INPUT_SIZE);
    let resized = image::imageops::resize(&image, new_w, new_h, FilterType::CatmullRom);

    let left = (new_w - INPUT_SIZE) / 2;
    let top = (new_h - INPUT_SIZE) / 2;

    let size = INPUT_SIZE as usize;
    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let px = resized.get_pixel(left + x, top + y);
            for c in 0..3 {
                let v = px[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
    }
    Ok(tensor)
}
