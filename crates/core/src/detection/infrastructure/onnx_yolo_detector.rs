/// YOLOv8 person/animal detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing, inference, class filtering and
/// per-class NMS.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::detector::{Detection, Detector};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::category::Category;
use crate::shared::constants::COCO_NUM_CLASSES;
use crate::shared::frame::Frame;
use crate::shared::onnx_session::{fixed_input_size, load_session};
use crate::shared::BoxError;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Box geometry values at the head of every output row: cx, cy, w, h.
const BOX_VALUES: usize = 4;

/// YOLOv8 detector backed by an ONNX Runtime session.
///
/// The session is behind a mutex; callers bound concurrency with the
/// inference pool rather than by cloning sessions.
pub struct OnnxYoloDetector {
    session: Mutex<ort::session::Session>,
    nms_iou: f64,
    input_size: u32,
}

impl OnnxYoloDetector {
    /// Load a YOLOv8 ONNX export (`[1, 84, N]` output) and prepare for inference.
    pub fn new(model_path: &Path, nms_iou: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path)?;
        let input_size = fixed_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);
        log::info!(
            "Loaded detector {} (input {input_size}x{input_size})",
            model_path.display()
        );
        Ok(Self {
            session: Mutex::new(session),
            nms_iou,
            input_size,
        })
    }
}

impl Detector for OnnxYoloDetector {
    fn detect(&self, frame: &Frame, min_confidence: f64) -> Result<Vec<Detection>, BoxError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
        }
        // [1, features, detections] from Ultralytics exports, but accept
        // the row-major layout too.
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if num_feats < BOX_VALUES + 1 {
            return Err(format!("YOLO output has too few features: {num_feats}").into());
        }
        let data = tensor
            .as_standard_layout()
            .as_slice()
            .ok_or("Cannot get tensor slice")?
            .to_vec();
        drop(outputs);
        drop(session);

        let letterbox = Letterbox {
            scale,
            pad_x: pad_x as f64,
            pad_y: pad_y as f64,
            frame_w: frame.width() as f64,
            frame_h: frame.height() as f64,
        };
        let value = |det: usize, feat: usize| -> f32 {
            if transposed {
                data[feat * num_dets + det]
            } else {
                data[det * num_feats + feat]
            }
        };

        let mut raw = Vec::new();
        for i in 0..num_dets {
            let class_count = (num_feats - BOX_VALUES).min(COCO_NUM_CLASSES);
            let Some((class_id, score)) = (0..class_count)
                .map(|c| (c, value(i, BOX_VALUES + c) as f64))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            else {
                continue;
            };
            if score < min_confidence {
                continue;
            }
            let Some(category) = Category::from_coco_class(class_id) else {
                continue;
            };
            let bbox = letterbox.to_frame(
                value(i, 0) as f64,
                value(i, 1) as f64,
                value(i, 2) as f64,
                value(i, 3) as f64,
            );
            if bbox.area() <= 0.0 {
                continue;
            }
            raw.push(Detection {
                bbox,
                confidence: score,
                class_id,
                category,
            });
        }

        Ok(nms_per_class(raw, self.nms_iou))
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

struct Letterbox {
    scale: f64,
    pad_x: f64,
    pad_y: f64,
    frame_w: f64,
    frame_h: f64,
}

impl Letterbox {
    /// Maps a center-format box in model space back to clamped frame coordinates.
    fn to_frame(&self, cx: f64, cy: f64, w: f64, h: f64) -> BoundingBox {
        let x1 = ((cx - w / 2.0) - self.pad_x) / self.scale;
        let y1 = ((cy - h / 2.0) - self.pad_y) / self.scale;
        let x2 = ((cx + w / 2.0) - self.pad_x) / self.scale;
        let y2 = ((cy + h / 2.0) - self.pad_y) / self.scale;
        BoundingBox::new(
            x1.clamp(0.0, self.frame_w),
            y1.clamp(0.0, self.frame_h),
            x2.clamp(0.0, self.frame_w),
            y2.clamp(0.0, self.frame_h),
        )
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray, the YOLO convention.
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

// ---------------------------------------------------------------------------
// NMS
// ---------------------------------------------------------------------------

/// Greedy NMS applied independently per class, so a person standing next to
/// a cow never suppresses it. Output is sorted by descending confidence.
fn nms_per_class(mut dets: Vec<Detection>, iou_thresh: f64) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in dets {
        let overlaps = keep
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_thresh);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}
