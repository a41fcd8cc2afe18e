use anyhow::Result;

#[cfg(feature = "camera")]
pub use self::device::Camera;

/// An owned RGB8 frame.
pub type Frame = image::RgbImage;

/// Where frames come from.
pub trait VideoSource {
    /// Whether a frame can be captured right now.
    fn is_ready(&self) -> bool;

    /// Raw pixel dimensions of the video, `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// `Ok(None)` means no frame was available this time.
    fn capture(&mut self) -> Result<Option<Frame>>;
}

impl<V: VideoSource + ?Sized> VideoSource for Box<V> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn capture(&mut self) -> Result<Option<Frame>> {
        (**self).capture()
    }
}

#[cfg(feature = "camera")]
mod device {
    use anyhow::{anyhow, Result};
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureAPIs},
    };

    use super::{Frame, VideoSource};

    pub struct Camera {
        capture: VideoCapture,
        width: u32,
        height: u32,
    }

    impl Camera {
        pub fn new(device_id: i32) -> Result<Self> {
            let capture = VideoCapture::new(device_id, VideoCaptureAPIs::CAP_ANY as i32)?;

            if !capture.is_opened()? {
                anyhow::bail!("Failed to open camera {device_id}");
            }

            let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
            let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
            tracing::info!(device_id, width, height, "camera opened");

            Ok(Self {
                capture,
                width,
                height,
            })
        }

        fn to_rgb(frame: &Mat) -> Result<Frame> {
            let mut rgb = Mat::default();
            imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

            let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
            let bytes = rgb.data_bytes()?.to_vec();
            Frame::from_raw(width, height, bytes)
                .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))
        }
    }

    impl VideoSource for Camera {
        fn is_ready(&self) -> bool {
            self.capture.is_opened().unwrap_or(false)
        }

        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn capture(&mut self) -> Result<Option<Frame>> {
            let mut frame = Mat::default();
            if !self.capture.read(&mut frame)? || frame.empty() {
                return Ok(None);
            }

            let rgb = Self::to_rgb(&frame)?;
            // Drivers may not report a size until the first frame arrives.
            self.width = rgb.width();
            self.height = rgb.height();
            Ok(Some(rgb))
        }
    }
}
