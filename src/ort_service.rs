use crate::{
    config::{ModelConfig, Validatable},
    detection::{DetectionBackend, DetectionResult, Keypoint, NormalizedBox},
    error::InvocationError,
};
use image::{imageops::FilterType, GenericImageView, ImageReader};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix2, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

const INPUT_SIZE: u32 = 640;

#[derive(Debug, Clone)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    keypoints: Option<Vec<Keypoint>>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }

    fn into_detection(self) -> DetectionResult {
        let scale = INPUT_SIZE as f32;
        DetectionResult {
            class_id: self.class_id,
            bbox: NormalizedBox::from_corners(
                self.x1 / scale,
                self.y1 / scale,
                self.x2 / scale,
                self.y2 / scale,
            ),
            confidence: Some(self.confidence),
            keypoints: self.keypoints,
        }
    }
}

fn intersection(box1: &Candidate, box2: &Candidate) -> f32 {
    let width = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let height = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    width.max(0.) * height.max(0.)
}

fn union(box1: &Candidate, box2: &Candidate) -> f32 {
    box1.area() + box2.area() - intersection(box1, box2)
}

fn iou(box1: &Candidate, box2: &Candidate) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

fn load_image(image_path: &Path) -> Result<Array<f32, Ix4>, InvocationError> {
    let original_img = ImageReader::open(image_path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| InvocationError::Decode(format!("{:?}: {}", image_path, e)))?
        .decode()
        .map_err(|e| InvocationError::Decode(format!("{:?}: {}", image_path, e)))?;

    let img = original_img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(input)
}

/// Decodes a `[1, 4 + num_classes + extra, anchors]` YOLO head. Extra channels
/// that come in triples are read as keypoints.
pub fn decode_output(
    output: ArrayViewD<f32>,
    num_classes: usize,
    min_probability: f32,
    iou_threshold: f32,
) -> Result<Vec<DetectionResult>, InvocationError> {
    if output.ndim() != 3 || output.shape()[0] != 1 {
        return Err(InvocationError::Model(format!(
            "unexpected output shape {:?}",
            output.shape()
        )));
    }
    let channels = output.shape()[1];
    if num_classes == 0 || channels < 4 + num_classes {
        return Err(InvocationError::Model(format!(
            "output has {} channels, cannot hold {} classes",
            channels, num_classes
        )));
    }
    let extra = channels - 4 - num_classes;
    let has_keypoints = extra > 0 && extra % 3 == 0;

    let output = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|e| InvocationError::Model(format!("invalid tensor shape: {}", e)))?;

    let mut boxes = Vec::new();
    for row in output.axis_iter(Axis(1)) {
        let (class_id, prob) = row
            .iter()
            .skip(4)
            .take(num_classes)
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |accum, item| {
                if item.1 > accum.1 {
                    item
                } else {
                    accum
                }
            });

        if prob < min_probability {
            continue;
        }

        let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
        let keypoints = has_keypoints.then(|| {
            (0..extra / 3)
                .map(|k| {
                    let base = 4 + num_classes + k * 3;
                    Keypoint {
                        x: row[base] / INPUT_SIZE as f32,
                        y: row[base + 1] / INPUT_SIZE as f32,
                        confidence: row[base + 2],
                    }
                })
                .collect()
        });

        boxes.push(Candidate {
            class_id,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            keypoints,
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|candidate| iou(&best, candidate) < iou_threshold);
        result.push(best.into_detection());
    }

    Ok(result)
}

/// ONNX Runtime detector with a round-robin pool of sessions.
pub struct OrtDetector {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    num_classes: usize,
    min_probability: f32,
    iou_threshold: f32,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, InvocationError> {
        init_execution_providers()?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()
                    .map_err(|e| InvocationError::Model(e.to_string()))?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(|e| InvocationError::Model(e.to_string()))?
                    .commit_from_file(model_config.get_path())
                    .map_err(|e| InvocationError::Model(e.to_string()))?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, InvocationError>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            num_classes: model_config.num_classes,
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, InvocationError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InvocationError::Model(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InvocationError::Model(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| InvocationError::Model(format!("failed to extract tensor: {}", e)))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InvocationError::Model(format!("invalid tensor shape: {}", e)))
    }
}

impl DetectionBackend for OrtDetector {
    fn detect(&self, image_path: &Path) -> Result<Vec<DetectionResult>, InvocationError> {
        let input = load_image(image_path)?;
        let outputs = self.run_inference(&input)?;
        let detections = decode_output(
            outputs.view(),
            self.num_classes,
            self.min_probability,
            self.iou_threshold,
        )?;

        tracing::debug!("Decoded {} detections", detections.len());
        Ok(detections)
    }

    fn name(&self) -> &str {
        "onnxruntime"
    }
}

#[cfg(feature = "tensorrt")]
fn init_execution_providers() -> Result<(), InvocationError> {
    use ort::execution_providers::TensorRTExecutionProvider;

    ort::init()
        .with_execution_providers([TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build()])
        .commit()
        .map_err(|e| InvocationError::Model(e.to_string()))?;
    Ok(())
}

#[cfg(all(feature = "cuda", not(feature = "tensorrt")))]
fn init_execution_providers() -> Result<(), InvocationError> {
    use ort::execution_providers::CUDAExecutionProvider;

    ort::init()
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .commit()
        .map_err(|e| InvocationError::Model(e.to_string()))?;
    Ok(())
}

#[cfg(not(any(feature = "cuda", feature = "tensorrt")))]
fn init_execution_providers() -> Result<(), InvocationError> {
    Ok(())
}
