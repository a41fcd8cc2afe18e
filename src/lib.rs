//! Webcam posture monitor.
//!
//! A [`sampler::FrameSampler`] pulls frames from a [`camera::VideoSource`],
//! hands them to a [`inference::PoseEstimator`], feeds the first pose into a
//! [`posture::PostureClassifier`] and redraws an [`overlay::Surface`].
//! Posture is judged by the vertical gap between the eye line and the
//! shoulder line.

pub mod camera;
pub mod config;
pub mod inference;
pub mod overlay;
pub mod posture;
pub mod sampler;

pub use config::Config;
pub use inference::{Keypoint, Pose, PoseEstimator};
pub use posture::{PostureClassifier, PostureState};
pub use sampler::FrameSampler;
