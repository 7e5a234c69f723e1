//! Synthetic capture source.
//!
//! Stands in for a camera when the configured device is `stub://...`.
//! Generates a gradient that shifts scene every 50 frames, which the
//! change-based stub detector reports as intermittent presence.

use anyhow::Result;

use super::FrameSource;
use crate::frame::Frame;

const SCENE_CHANGE_INTERVAL: u64 = 50;

pub struct SyntheticSource {
    device: String,
    width: u32,
    height: u32,
    frame_rate: f64,
    frame_count: u64,
    scene_state: u8,
    timestamp_us: i64,
}

impl SyntheticSource {
    pub fn open(device: &str, width: u32, height: u32, frame_rate: f64) -> Self {
        log::info!("synthetic source: connected to {}", device);
        Self {
            device: device.to_string(),
            width,
            height,
            frame_rate,
            frame_count: 0,
            scene_state: 0,
            timestamp_us: 0,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        if self.frame_count % SCENE_CHANGE_INTERVAL == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        // frames within a scene are identical, so change-based detection
        // only fires at scene boundaries
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn grab(&mut self) -> Result<Option<Frame>> {
        self.frame_count += 1;
        self.timestamp_us = ((self.frame_count as f64 / self.frame_rate) * 1_000_000.0) as i64;
        let pixels = self.generate_pixels();
        Ok(Some(Frame::new(pixels, self.width, self.height)))
    }

    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn close(&mut self) -> Result<()> {
        log::info!("synthetic source: released {}", self.device);
        Ok(())
    }
}
