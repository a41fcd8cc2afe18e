use std::fmt;

use crate::config::Config;
use crate::inference::Pose;

pub const LEFT_EYE: &str = "left_eye";
pub const RIGHT_EYE: &str = "right_eye";
pub const LEFT_SHOULDER: &str = "left_shoulder";
pub const RIGHT_SHOULDER: &str = "right_shoulder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostureState {
    Good,
    Poor,
    #[default]
    Unknown,
}

impl PostureState {
    pub fn label(self) -> &'static str {
        match self {
            PostureState::Good => "Good Posture",
            PostureState::Poor => "Poor Posture",
            PostureState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PostureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NoPose,
    MissingKeypoints,
    EstimatorFailed,
}

/// Result of feeding one tick into the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Measured {
        distance: f32,
        state: PostureState,
    },
    Missed {
        reason: MissReason,
        streak: u32,
        state: PostureState,
    },
}

impl Reading {
    pub fn state(&self) -> PostureState {
        match *self {
            Reading::Measured { state, .. } | Reading::Missed { state, .. } => state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub distance_px: f32,
    pub min_score: f32,
    pub miss_limit: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            distance_px: 39.0,
            min_score: 0.5,
            miss_limit: 3,
        }
    }
}

impl From<&Config> for Thresholds {
    fn from(config: &Config) -> Self {
        Self {
            distance_px: config.posture_threshold_px,
            min_score: config.min_keypoint_score,
            miss_limit: config.miss_limit,
        }
    }
}

/// Eye-line vs shoulder-line classifier with miss hysteresis.
///
/// A Good/Poor reading survives up to `miss_limit - 1` consecutive misses
/// before the state falls back to [`PostureState::Unknown`].
#[derive(Debug, Clone, Default)]
pub struct PostureClassifier {
    thresholds: Thresholds,
    state: PostureState,
    miss_streak: u32,
}

impl PostureClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: PostureState::Unknown,
            miss_streak: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Thresholds::from(config))
    }

    pub fn state(&self) -> PostureState {
        self.state
    }

    pub fn miss_streak(&self) -> u32 {
        self.miss_streak
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn update(&mut self, pose: Option<&Pose>) -> PostureState {
        self.observe(pose).state()
    }

    pub fn observe(&mut self, pose: Option<&Pose>) -> Reading {
        let Some(pose) = pose else {
            return self.record_miss(MissReason::NoPose);
        };
        let Some(distance) = self.eye_shoulder_distance(pose) else {
            return self.record_miss(MissReason::MissingKeypoints);
        };

        self.state = if distance < self.thresholds.distance_px {
            PostureState::Poor
        } else {
            PostureState::Good
        };
        self.miss_streak = 0;

        Reading::Measured {
            distance,
            state: self.state,
        }
    }

    pub fn record_miss(&mut self, reason: MissReason) -> Reading {
        self.miss_streak = self.miss_streak.saturating_add(1);
        if self.miss_streak >= self.thresholds.miss_limit {
            self.state = PostureState::Unknown;
        }

        Reading::Missed {
            reason,
            streak: self.miss_streak,
            state: self.state,
        }
    }

    /// `|mean(eye y) - mean(shoulder y)|`, if all four points are confident
    /// and the result is a real number.
    fn eye_shoulder_distance(&self, pose: &Pose) -> Option<f32> {
        let min = self.thresholds.min_score;
        let left_eye = pose.find(LEFT_EYE, min)?;
        let right_eye = pose.find(RIGHT_EYE, min)?;
        let left_shoulder = pose.find(LEFT_SHOULDER, min)?;
        let right_shoulder = pose.find(RIGHT_SHOULDER, min)?;

        let eye_y = (left_eye.y + right_eye.y) / 2.0;
        let shoulder_y = (left_shoulder.y + right_shoulder.y) / 2.0;
        let distance = (eye_y - shoulder_y).abs();
        distance.is_finite().then_some(distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Keypoint;

    fn pose(eye_y: (f32, f32), shoulder_y: (f32, f32)) -> Pose {
        Pose::new(vec![
            Keypoint::new("nose", 320.0, 90.0, 0.99),
            Keypoint::new(LEFT_EYE, 340.0, eye_y.0, 0.9),
            Keypoint::new(RIGHT_EYE, 300.0, eye_y.1, 0.9),
            Keypoint::new(LEFT_SHOULDER, 420.0, shoulder_y.0, 0.8),
            Keypoint::new(RIGHT_SHOULDER, 220.0, shoulder_y.1, 0.8),
        ])
    }

    #[test]
    fn starts_unknown() {
        let classifier = PostureClassifier::default();
        assert_eq!(classifier.state(), PostureState::Unknown);
        assert_eq!(classifier.miss_streak(), 0);
    }

    #[test]
    fn wide_gap_is_good() {
        let mut classifier = PostureClassifier::default();
        assert_eq!(
            classifier.update(Some(&pose((100.0, 100.0), (160.0, 160.0)))),
            PostureState::Good
        );
    }

    #[test]
    fn narrow_gap_is_poor() {
        let mut classifier = PostureClassifier::default();
        assert_eq!(
            classifier.update(Some(&pose((100.0, 100.0), (130.0, 130.0)))),
            PostureState::Poor
        );
    }

    #[test]
    fn threshold_boundary() {
        let mut classifier = PostureClassifier::default();
        assert_eq!(
            classifier.update(Some(&pose((100.0, 100.0), (139.0, 139.0)))),
            PostureState::Good
        );
        assert_eq!(
            classifier.update(Some(&pose((100.0, 100.0), (138.9, 138.9)))),
            PostureState::Poor
        );
    }

    #[test]
    fn distance_uses_averages_and_ignores_sign() {
        let mut classifier = PostureClassifier::default();
        // eyes average 150, shoulders average 100: eyes below shoulders in frame
        let reading = classifier.observe(Some(&pose((150.0, 150.0), (120.0, 80.0))));
        assert_eq!(
            reading,
            Reading::Measured {
                distance: 50.0,
                state: PostureState::Good
            }
        );
    }

    #[test]
    fn single_miss_keeps_good() {
        let mut classifier = PostureClassifier::default();
        classifier.update(Some(&pose((100.0, 100.0), (160.0, 160.0))));
        assert_eq!(classifier.update(None), PostureState::Good);
        assert_eq!(classifier.miss_streak(), 1);
    }

    #[test]
    fn three_misses_become_unknown() {
        let mut classifier = PostureClassifier::default();
        classifier.update(Some(&pose((100.0, 100.0), (160.0, 160.0))));
        assert_eq!(classifier.update(None), PostureState::Good);
        assert_eq!(classifier.update(None), PostureState::Good);
        assert_eq!(classifier.update(None), PostureState::Unknown);
        assert_eq!(classifier.miss_streak(), 3);
        assert_eq!(classifier.update(None), PostureState::Unknown);
    }

    #[test]
    fn success_resets_streak() {
        let mut classifier = PostureClassifier::default();
        classifier.update(None);
        classifier.update(None);
        assert_eq!(classifier.miss_streak(), 2);

        assert_eq!(
            classifier.update(Some(&pose((100.0, 100.0), (130.0, 130.0)))),
            PostureState::Poor
        );
        assert_eq!(classifier.miss_streak(), 0);
    }

    #[test]
    fn low_confidence_keypoint_counts_as_miss() {
        let mut classifier = PostureClassifier::default();
        classifier.update(Some(&pose((100.0, 100.0), (130.0, 130.0))));

        let mut weak = pose((100.0, 100.0), (160.0, 160.0));
        weak.keypoints
            .iter_mut()
            .filter(|kp| kp.name == RIGHT_SHOULDER)
            .for_each(|kp| kp.score = 0.5);

        assert_eq!(
            classifier.observe(Some(&weak)),
            Reading::Missed {
                reason: MissReason::MissingKeypoints,
                streak: 1,
                state: PostureState::Poor
            }
        );
    }

    #[test]
    fn missing_keypoint_counts_as_miss() {
        let mut classifier = PostureClassifier::default();
        let mut partial = pose((100.0, 100.0), (160.0, 160.0));
        partial.keypoints.retain(|kp| kp.name != LEFT_EYE);

        let reading = classifier.observe(Some(&partial));
        assert!(matches!(
            reading,
            Reading::Missed {
                reason: MissReason::MissingKeypoints,
                ..
            }
        ));
    }

    #[test]
    fn non_finite_coordinates_count_as_miss() {
        let mut classifier = PostureClassifier::default();
        classifier.update(Some(&pose((100.0, 100.0), (130.0, 130.0))));

        let reading = classifier.observe(Some(&pose((f32::NAN, 100.0), (160.0, 160.0))));
        assert_eq!(
            reading,
            Reading::Missed {
                reason: MissReason::MissingKeypoints,
                streak: 1,
                state: PostureState::Poor
            }
        );

        let reading = classifier.observe(Some(&pose((100.0, 100.0), (f32::INFINITY, 160.0))));
        assert_eq!(reading.state(), PostureState::Poor);
        assert_eq!(classifier.miss_streak(), 2);
    }

    #[test]
    fn custom_thresholds() {
        let mut classifier = PostureClassifier::new(Thresholds {
            distance_px: 70.0,
            min_score: 0.5,
            miss_limit: 1,
        });
        assert_eq!(
            classifier.update(Some(&pose((100.0, 100.0), (160.0, 160.0)))),
            PostureState::Poor
        );
        assert_eq!(
            classifier.record_miss(MissReason::EstimatorFailed).state(),
            PostureState::Unknown
        );
    }

    #[test]
    fn thresholds_follow_config() {
        let config = Config {
            posture_threshold_px: 25.0,
            min_keypoint_score: 0.3,
            miss_limit: 5,
            ..Config::default()
        };
        let classifier = PostureClassifier::from_config(&config);
        assert_eq!(
            *classifier.thresholds(),
            Thresholds {
                distance_px: 25.0,
                min_score: 0.3,
                miss_limit: 5
            }
        );
    }
}
