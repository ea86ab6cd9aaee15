/// Axis-aligned box in frame pixel coordinates, `[x1, y1]` inclusive to
/// `[x2, y2]` exclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Integer pixel window used to crop a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }

    /// Grows the box by `padding` pixels on every side and clamps it to a
    /// `frame_w` x `frame_h` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn padded_crop(&self, padding: u32, frame_w: u32, frame_h: u32) -> Option<CropRect> {
        let pad = padding as f64;
        let x1 = (self.x1 - pad).floor().max(0.0);
        let y1 = (self.y1 - pad).floor().max(0.0);
        let x2 = (self.x2 + pad).ceil().min(frame_w as f64);
        let y2 = (self.y2 + pad).ceil().min(frame_h as f64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(CropRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

impl CropRect {
    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }
}
