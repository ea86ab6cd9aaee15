use std::time::Instant;

use ndarray::ArrayView3;

use super::bounding_box::CropRect;

/// A single camera frame: contiguous RGB bytes in row-major order.
///
/// Format conversion happens at capture boundaries only; the pipeline
/// treats pixel data as opaque apart from cropping.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
    camera_id: Option<u32>,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            camera_id: None,
            captured_at: Instant::now(),
        }
    }

    /// Tags the frame with the camera it was pulled from.
    pub fn with_camera(mut self, camera_id: u32) -> Self {
        self.camera_id = Some(camera_id);
        self
    }

    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn camera_id(&self) -> Option<u32> {
        self.camera_id
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the pixels inside `rect` into a new frame.
    ///
    /// The rectangle is clamped to the frame bounds; the crop keeps the
    /// source camera, index and capture time.
    pub fn crop(&self, rect: &CropRect) -> Frame {
        let x0 = rect.x.min(self.width) as usize;
        let y0 = rect.y.min(self.height) as usize;
        let x1 = (rect.x + rect.width).min(self.width) as usize;
        let y1 = (rect.y + rect.height).min(self.height) as usize;
        let c = self.channels as usize;
        let stride = self.width as usize * c;

        let mut data = Vec::with_capacity((x1 - x0) * (y1 - y0) * c);
        for row in y0..y1 {
            let start = row * stride + x0 * c;
            data.extend_from_slice(&self.data[start..start + (x1 - x0) * c]);
        }

        Frame {
            data,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
            channels: self.channels,
            index: self.index,
            camera_id: self.camera_id,
            captured_at: self.captured_at,
        }
    }

    /// Encodes an RGB frame as JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode(
            &self.data,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )?;
        Ok(buf)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
