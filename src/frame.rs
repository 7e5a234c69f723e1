//! Frame data model.
//!
//! A `Frame` is one RGB24 image sample. Frames published on the bus are
//! wrapped in `Arc` and handed to every listener as a shared reference;
//! listeners must treat shared frames as immutable and copy before
//! mutating (the batch processor works on its own decoded copies, so it
//! may annotate in place).

/// One timestamped image sample from a video stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// RGB24 pixel data, row-major, `width * height * 3` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize) * 3);
        Self {
            data,
            width,
            height,
        }
    }

    /// Solid-color frame, used by synthetic sources and tests.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; (width as usize) * (height as usize) * 3],
            width,
            height,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Copy the pixels inside `region`, clamped to the frame bounds.
    /// Used to extract face crops for classification and storage.
    pub fn crop(&self, region: &Region) -> Frame {
        let x0 = region.x.min(self.width);
        let y0 = region.y.min(self.height);
        let x1 = (region.x + region.w).min(self.width);
        let y1 = (region.y + region.h).min(self.height);
        let (cw, ch) = (x1 - x0, y1 - y0);

        let mut data = Vec::with_capacity((cw as usize) * (ch as usize) * 3);
        for row in y0..y1 {
            let start = ((row * self.width + x0) * 3) as usize;
            let end = start + (cw as usize) * 3;
            data.extend_from_slice(&self.data[start..end]);
        }
        Frame::new(data, cw, ch)
    }
}

/// Axis-aligned pixel rectangle within a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}
