use anyhow::Result;

use crate::camera::Frame;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxPoseDetector;

/// BlazePose landmark names, in model output order.
pub const KEYPOINT_NAMES: [&str; 33] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

/// A named landmark in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl Keypoint {
    pub fn new(name: impl Into<String>, x: f32, y: f32, score: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            score,
        }
    }
}

/// Keypoints of one detected person in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    /// First keypoint called `name` whose score is strictly above `min_score`.
    pub fn find(&self, name: &str, min_score: f32) -> Option<&Keypoint> {
        self.keypoints
            .iter()
            .find(|kp| kp.name == name && kp.score > min_score)
    }

    pub fn confident(&self, min_score: f32) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.iter().filter(move |kp| kp.score > min_score)
    }
}

/// Anything that turns a frame into zero or more poses.
pub trait PoseEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>>;
}

impl<E: PoseEstimator + ?Sized> PoseEstimator for Box<E> {
    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>> {
        (**self).estimate(frame)
    }
}

// Full-body BlazePose exports 39 rows: 33 landmarks plus 6 auxiliary points.
#[cfg(any(feature = "onnx", test))]
const BLAZEPOSE_ROWS: usize = 39;

#[cfg(any(feature = "onnx", test))]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// The pose flag output is already a probability; a missing or NaN value
/// counts as absent.
#[cfg(any(feature = "onnx", test))]
fn pose_present(flag: Option<f32>, threshold: f32) -> bool {
    flag.is_some_and(|p| p >= threshold)
}

/// Row width of a landmark tensor: the last axis of `[1, N, C]`, otherwise
/// inferred from a flat length. `None` if the rows can't hold x and y for
/// every named landmark.
#[cfg(any(feature = "onnx", test))]
fn landmark_stride(shape: &[usize], len: usize) -> Option<usize> {
    let stride = if shape.len() >= 3 {
        shape[2]
    } else if len % BLAZEPOSE_ROWS == 0 {
        len / BLAZEPOSE_ROWS
    } else {
        len / KEYPOINT_NAMES.len()
    };
    (stride >= 2 && len >= stride * KEYPOINT_NAMES.len()).then_some(stride)
}

/// Turns flat landmark rows `[x, y, z?, visibility?, ...]` given in model input
/// pixels into named keypoints scaled to the frame.
#[cfg(any(feature = "onnx", test))]
fn decode_landmarks(
    values: &[f32],
    stride: usize,
    scale_x: f32,
    scale_y: f32,
) -> Vec<Keypoint> {
    values
        .chunks_exact(stride)
        .zip(KEYPOINT_NAMES)
        .map(|(row, name)| {
            let score = if stride > 3 { sigmoid(row[3]) } else { 1.0 };
            Keypoint::new(name, row[0] * scale_x, row[1] * scale_y, score)
        })
        .collect()
}

#[cfg(feature = "onnx")]
mod onnx {
    use anyhow::{anyhow, bail, Context, Result};
    use image::imageops::{self, FilterType};
    use ndarray::Array4;
    use ort::{GraphOptimizationLevel, Session, ValueType};

    use super::{decode_landmarks, landmark_stride, pose_present, Pose, PoseEstimator};
    use crate::camera::Frame;

    const DEFAULT_INPUT_SIZE: u32 = 256;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Layout {
        Nchw,
        Nhwc,
    }

    pub struct OnnxPoseDetector {
        session: Session,
        input_width: u32,
        input_height: u32,
        layout: Layout,
        presence_threshold: f32,
    }

    impl OnnxPoseDetector {
        pub fn new(model_path: &str, presence_threshold: f32) -> Result<Self> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(model_path)
                .with_context(|| format!("loading pose model {model_path}"))?;

            let (input_width, input_height, layout) = Self::input_dimensions(&session)?;
            tracing::info!(
                model = model_path,
                input_width,
                input_height,
                ?layout,
                "pose model loaded"
            );

            Ok(Self {
                session,
                input_width,
                input_height,
                layout,
                presence_threshold,
            })
        }

        fn input_dimensions(session: &Session) -> Result<(u32, u32, Layout)> {
            let input = session
                .inputs
                .first()
                .ok_or_else(|| anyhow!("pose model has no inputs"))?;

            let ValueType::Tensor { dimensions, .. } = &input.input_type else {
                bail!("pose model input {} is not a tensor", input.name);
            };
            let dim = |i: usize| {
                dimensions
                    .get(i)
                    .copied()
                    .filter(|d| *d > 0)
                    .map(|d| d as u32)
            };

            if dimensions.len() < 4 {
                return Ok((DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE, Layout::Nhwc));
            }
            if dim(1) == Some(3) {
                let h = dim(2).unwrap_or(DEFAULT_INPUT_SIZE);
                let w = dim(3).unwrap_or(DEFAULT_INPUT_SIZE);
                Ok((w, h, Layout::Nchw))
            } else {
                let h = dim(1).unwrap_or(DEFAULT_INPUT_SIZE);
                let w = dim(2).unwrap_or(DEFAULT_INPUT_SIZE);
                Ok((w, h, Layout::Nhwc))
            }
        }

        fn preprocess(&self, frame: &Frame) -> Array4<f32> {
            let resized = imageops::resize(
                frame,
                self.input_width,
                self.input_height,
                FilterType::Triangle,
            );
            let (h, w) = (self.input_height as usize, self.input_width as usize);
            let shape = match self.layout {
                Layout::Nchw => (1, 3, h, w),
                Layout::Nhwc => (1, h, w, 3),
            };

            let mut input = Array4::<f32>::zeros(shape);
            for (x, y, pixel) in resized.enumerate_pixels() {
                let (x, y) = (x as usize, y as usize);
                for c in 0..3 {
                    let value = pixel.0[c] as f32 / 255.0;
                    match self.layout {
                        Layout::Nchw => input[[0, c, y, x]] = value,
                        Layout::Nhwc => input[[0, y, x, c]] = value,
                    }
                }
            }
            input
        }
    }

    impl PoseEstimator for OnnxPoseDetector {
        fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>> {
            let input = self.preprocess(frame);
            let outputs = self.session.run(ort::inputs![input]?)?;

            if self.session.outputs.len() > 1 {
                let flag = outputs[1].try_extract_tensor::<f32>()?;
                let flag = flag.iter().next().copied();
                if !pose_present(flag, self.presence_threshold) {
                    tracing::debug!(?flag, "no person in frame");
                    return Ok(Vec::new());
                }
            }

            let landmarks = outputs[0].try_extract_tensor::<f32>()?;
            let shape = landmarks.shape().to_vec();
            let values: Vec<f32> = landmarks.iter().copied().collect();

            let Some(stride) = landmark_stride(&shape, values.len()) else {
                bail!("unexpected landmark output shape {shape:?}");
            };

            let scale_x = frame.width() as f32 / self.input_width as f32;
            let scale_y = frame.height() as f32 / self.input_height as f32;
            let keypoints = decode_landmarks(&values, stride, scale_x, scale_y);

            Ok(vec![Pose::new(keypoints)])
        }
    }
}
