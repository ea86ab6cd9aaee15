pub const DETECTOR_MODEL_NAME: &str = "yolov8n.onnx";
pub const EMBEDDER_MODEL_NAME: &str = "efficientnet_b0_features.onnx";

/// Output width of the EfficientNet-B0 average pool.
pub const EMBEDDING_DIM: usize = 1280;

pub const COCO_PERSON_CLASS: usize = 0;
/// bird, cat, dog, horse, sheep, cow, elephant, bear, zebra, giraffe.
pub const COCO_ANIMAL_CLASSES: &[usize] = &[14, 15, 16, 17, 18, 19, 20, 21, 22, 23];
pub const COCO_NUM_CLASSES: usize = 80;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.60;
pub const DEFAULT_DETECTION_CONFIDENCE: f64 = 0.40;

/// Unix days, used to bucket "seen today" sightings.
pub const SECONDS_PER_DAY: u64 = 86_400;

pub const PHOTO_JPEG_QUALITY: u8 = 85;
