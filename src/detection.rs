use crate::error::InvocationError;
use serde::Serialize;
use std::path::Path;

/// Box in image-relative coordinates, every field a fraction in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let x1 = x1.clamp(0., 1.);
        let y1 = y1.clamp(0., 1.);
        let x2 = x2.clamp(0., 1.);
        let y2 = y2.clamp(0., 1.);
        Self {
            center_x: (x1 + x2) / 2.,
            center_y: (y1 + y2) / 2.,
            width: (x2 - x1).max(0.),
            height: (y2 - y1).max(0.),
        }
    }

    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (
            self.center_x - self.width / 2.,
            self.center_y - self.height / 2.,
            self.center_x + self.width / 2.,
            self.center_y + self.height / 2.,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub class_id: usize,
    pub bbox: NormalizedBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keypoints: Option<Vec<Keypoint>>,
}

/// Blocking detection capability. Callers run it on a worker thread.
pub trait DetectionBackend: Send + Sync + 'static {
    fn detect(&self, image_path: &Path) -> Result<Vec<DetectionResult>, InvocationError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_corners_clamps() {
        let bbox = NormalizedBox::from_corners(-0.2, 0.1, 0.6, 1.3);
        assert!((bbox.center_x - 0.3).abs() < 1e-6);
        assert!((bbox.width - 0.6).abs() < 1e-6);
        assert!((bbox.center_y - 0.55).abs() < 1e-6);
        assert!((bbox.height - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_corners() {
        let bbox = NormalizedBox {
            center_x: 0.5,
            center_y: 0.5,
            width: 0.5,
            height: 0.25,
        };
        assert_eq!(bbox.corners(), (0.25, 0.375, 0.75, 0.625));
    }
}
