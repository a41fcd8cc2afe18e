use anyhow::Result;
use image::{Rgba, RgbaImage};

use crate::camera::Frame;
use crate::inference::Pose;
use crate::posture::PostureState;

#[cfg(feature = "camera")]
pub use self::window::WindowOverlay;

pub const GOOD_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);
pub const ALERT_COLOR: Rgba<u8> = Rgba([220, 0, 0, 255]);
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

pub const POOR_POSTURE_ALERT: &str = "Alert: Please correct your posture!";

// Keeps circle bounds and squared radii well inside i64.
const MAX_EXTENT: i64 = 1 << 24;

pub fn keypoint_color(state: PostureState) -> Rgba<u8> {
    match state {
        PostureState::Good => GOOD_COLOR,
        PostureState::Poor | PostureState::Unknown => ALERT_COLOR,
    }
}

/// A 2D drawing surface laid over the video.
pub trait Surface {
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Latest video frame, for surfaces that composite over it.
    fn set_backdrop(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> Result<()>;

    fn fill_circle(&mut self, x: f32, y: f32, radius: u32, color: Rgba<u8>) -> Result<()>;

    fn set_status(&mut self, state: PostureState) -> Result<()>;

    fn present(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called between ticks so windowed surfaces can handle UI events.
    fn poll(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        (**self).resize(width, height)
    }

    fn set_backdrop(&mut self, frame: &Frame) -> Result<()> {
        (**self).set_backdrop(frame)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }

    fn fill_circle(&mut self, x: f32, y: f32, radius: u32, color: Rgba<u8>) -> Result<()> {
        (**self).fill_circle(x, y, radius, color)
    }

    fn set_status(&mut self, state: PostureState) -> Result<()> {
        (**self).set_status(state)
    }

    fn present(&mut self) -> Result<()> {
        (**self).present()
    }

    fn poll(&mut self) -> Result<()> {
        (**self).poll()
    }
}

/// Clears `surface` and draws every keypoint above `min_score`,
/// green only while posture is good. Keypoints off the real plane are skipped.
pub fn render<S: Surface + ?Sized>(
    surface: &mut S,
    pose: Option<&Pose>,
    state: PostureState,
    min_score: f32,
    radius: u32,
) -> Result<()> {
    surface.clear()?;
    if let Some(pose) = pose {
        let color = keypoint_color(state);
        for kp in pose
            .confident(min_score)
            .filter(|kp| kp.x.is_finite() && kp.y.is_finite())
        {
            surface.fill_circle(kp.x, kp.y, radius, color)?;
        }
    }
    surface.set_status(state)?;
    surface.present()
}

/// In-memory RGBA overlay with a transparent background.
#[derive(Debug, Clone)]
pub struct RasterOverlay {
    image: RgbaImage,
    status: PostureState,
}

impl Default for RasterOverlay {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl RasterOverlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, TRANSPARENT),
            status: PostureState::Unknown,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn status(&self) -> PostureState {
        self.status
    }

    pub fn alert(&self) -> Option<&'static str> {
        (self.status == PostureState::Poor).then_some(POOR_POSTURE_ALERT)
    }

    pub fn painted_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p.0[3] != 0).count()
    }
}

impl Surface for RasterOverlay {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::from_pixel(width, height, TRANSPARENT);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.image.pixels_mut().for_each(|p| *p = TRANSPARENT);
        Ok(())
    }

    fn fill_circle(&mut self, x: f32, y: f32, radius: u32, color: Rgba<u8>) -> Result<()> {
        if !x.is_finite() || !y.is_finite() {
            return Ok(());
        }
        let bound = MAX_EXTENT as f32;
        let cx = x.round().clamp(-bound, bound) as i64;
        let cy = y.round().clamp(-bound, bound) as i64;
        let r = (radius as i64).min(MAX_EXTENT);
        let r2 = r.saturating_mul(r);
        let (w, h) = (self.image.width() as i64, self.image.height() as i64);

        for py in cy.saturating_sub(r).max(0)..=cy.saturating_add(r).min(h - 1) {
            for px in cx.saturating_sub(r).max(0)..=cx.saturating_add(r).min(w - 1) {
                let (dx, dy) = (px - cx, py - cy);
                if dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy)) <= r2 {
                    self.image.put_pixel(px as u32, py as u32, color);
                }
            }
        }
        Ok(())
    }

    fn set_status(&mut self, state: PostureState) -> Result<()> {
        self.status = state;
        Ok(())
    }
}

#[cfg(feature = "camera")]
mod window {
    use anyhow::Result;
    use crossbeam_channel::Sender;
    use image::Rgba;
    use opencv::{
        core::{Mat, Point, Scalar, CV_8UC3},
        highgui, imgproc,
        prelude::*,
    };

    use super::{keypoint_color, Surface, POOR_POSTURE_ALERT};
    use crate::camera::Frame;
    use crate::posture::PostureState;

    const KEY_ESC: i32 = 27;

    fn bgr(color: Rgba<u8>) -> Scalar {
        let [r, g, b, _] = color.0;
        Scalar::new(b as f64, g as f64, r as f64, 0.0)
    }

    /// HighGUI window showing keypoints and the status banner over the live video.
    /// Pressing `q` or Esc, or closing the window, sends on `shutdown`.
    pub struct WindowOverlay {
        name: String,
        backdrop: Mat,
        canvas: Mat,
        status: PostureState,
        shutdown: Sender<()>,
    }

    impl WindowOverlay {
        pub fn new(name: &str, shutdown: Sender<()>) -> Result<Self> {
            highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
            Ok(Self {
                name: name.to_string(),
                backdrop: Mat::default(),
                canvas: Mat::default(),
                status: PostureState::Unknown,
                shutdown,
            })
        }

        fn blank(width: u32, height: u32) -> Result<Mat> {
            Ok(Mat::new_rows_cols_with_default(
                height as i32,
                width as i32,
                CV_8UC3,
                Scalar::all(0.0),
            )?)
        }

        /// Runs the HighGUI event loop once and requests shutdown on quit keys
        /// or when the window has been closed.
        fn pump_events(&mut self) -> Result<()> {
            let key = highgui::wait_key(1)?;
            let visible = highgui::get_window_property(&self.name, highgui::WND_PROP_VISIBLE)?;
            if key == KEY_ESC || key == 'q' as i32 || visible < 1.0 {
                let _ = self.shutdown.try_send(());
            }
            Ok(())
        }

        fn draw_banner(&mut self) -> Result<()> {
            let color = bgr(keypoint_color(self.status));
            imgproc::put_text(
                &mut self.canvas,
                &format!("Posture Status: {}", self.status),
                Point::new(10, 30),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.8,
                color,
                2,
                imgproc::LINE_8,
                false,
            )?;
            if self.status == PostureState::Poor {
                imgproc::put_text(
                    &mut self.canvas,
                    POOR_POSTURE_ALERT,
                    Point::new(10, 60),
                    imgproc::FONT_HERSHEY_SIMPLEX,
                    0.8,
                    color,
                    2,
                    imgproc::LINE_8,
                    false,
                )?;
            }
            Ok(())
        }
    }

    impl Surface for WindowOverlay {
        fn resize(&mut self, width: u32, height: u32) -> Result<()> {
            let size = self.canvas.size()?;
            if size.width != width as i32 || size.height != height as i32 {
                self.backdrop = Self::blank(width, height)?;
                self.canvas = Self::blank(width, height)?;
            }
            Ok(())
        }

        fn set_backdrop(&mut self, frame: &Frame) -> Result<()> {
            let mut rgb = Self::blank(frame.width(), frame.height())?;
            rgb.data_bytes_mut()?.copy_from_slice(frame.as_raw());
            imgproc::cvt_color(&rgb, &mut self.backdrop, imgproc::COLOR_RGB2BGR, 0)?;
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.backdrop.copy_to(&mut self.canvas)?;
            Ok(())
        }

        fn fill_circle(&mut self, x: f32, y: f32, radius: u32, color: Rgba<u8>) -> Result<()> {
            imgproc::circle(
                &mut self.canvas,
                Point::new(x.round() as i32, y.round() as i32),
                radius.min(i32::MAX as u32) as i32,
                bgr(color),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )?;
            Ok(())
        }

        fn set_status(&mut self, state: PostureState) -> Result<()> {
            self.status = state;
            Ok(())
        }

        fn present(&mut self) -> Result<()> {
            self.draw_banner()?;
            highgui::imshow(&self.name, &self.canvas)?;
            self.pump_events()
        }

        fn poll(&mut self) -> Result<()> {
            self.pump_events()
        }
    }
}
