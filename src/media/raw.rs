//! Raw length-prefixed segment container.
//!
//! Layout: an 8-byte magic/version header, the frame geometry and rate,
//! then zero or more records of `[timestamp_us: i64][len: u32][pixels]`.
//! Not a distribution format; it exists so recorded segments can be read
//! back frame-by-frame without codec bindings.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{FrameSink, FrameSource, MediaBackend, SinkSettings};
use crate::frame::Frame;

const MAGIC: &[u8; 6] = b"WDGRAW";
const VERSION: u16 = 1;

/// Backend producing raw-container sources and sinks.
pub struct RawMediaBackend;

impl MediaBackend for RawMediaBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(RawFileSource::open(path)?))
    }

    fn open_sink(&self, path: &Path, settings: &SinkSettings) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(RawFileSink::create(path, settings)?))
    }
}

pub struct RawFileSink {
    writer: Option<BufWriter<File>>,
    pending_timestamp_us: i64,
}

impl RawFileSink {
    pub fn create(path: &Path, settings: &SinkSettings) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create segment file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_u16::<LittleEndian>(VERSION)?;
        writer.write_u32::<LittleEndian>(settings.width)?;
        writer.write_u32::<LittleEndian>(settings.height)?;
        writer.write_f64::<LittleEndian>(settings.frame_rate)?;
        Ok(Self {
            writer: Some(writer),
            pending_timestamp_us: 0,
        })
    }
}

impl FrameSink for RawFileSink {
    fn set_timestamp(&mut self, timestamp_us: i64) {
        self.pending_timestamp_us = timestamp_us;
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("sink already closed"))?;
        writer.write_i64::<LittleEndian>(self.pending_timestamp_us)?;
        writer.write_u32::<LittleEndian>(frame.data.len() as u32)?;
        writer.write_all(&frame.data)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

pub struct RawFileSource {
    reader: Option<BufReader<File>>,
    width: u32,
    height: u32,
    frame_rate: f64,
    last_timestamp_us: i64,
}

impl RawFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open segment file {}", path.display()))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(anyhow!("{}: not a raw segment file", path.display()));
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(anyhow!(
                "{}: unsupported raw segment version {}",
                path.display(),
                version
            ));
        }
        let width = reader.read_u32::<LittleEndian>()?;
        let height = reader.read_u32::<LittleEndian>()?;
        let frame_rate = reader.read_f64::<LittleEndian>()?;

        Ok(Self {
            reader: Some(reader),
            width,
            height,
            frame_rate,
            last_timestamp_us: 0,
        })
    }
}

impl FrameSource for RawFileSource {
    fn grab(&mut self) -> Result<Option<Frame>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let timestamp_us = match reader.read_i64::<LittleEndian>() {
            Ok(ts) => ts,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = reader.read_u32::<LittleEndian>()? as usize;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        self.last_timestamp_us = timestamp_us;
        Ok(Some(Frame::new(data, self.width, self.height)))
    }

    fn timestamp_us(&self) -> i64 {
        self.last_timestamp_us
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SinkSettings {
        SinkSettings {
            width: 4,
            height: 2,
            frame_rate: 5.0,
            bit_rate: 600_000,
            quality: 40,
            codec: "raw".to_string(),
            format: "wdg".to_string(),
        }
    }

    #[test]
    fn written_frames_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.wdg");

        let mut sink = RawFileSink::create(&path, &settings()).unwrap();
        for i in 0..3u8 {
            sink.set_timestamp(i as i64 * 200_000);
            sink.write(&Frame::filled(4, 2, i)).unwrap();
        }
        sink.close().unwrap();

        let mut source = RawFileSource::open(&path).unwrap();
        assert_eq!(source.frame_rate(), 5.0);
        for i in 0..3u8 {
            let frame = source.grab().unwrap().expect("frame");
            assert_eq!(frame.data[0], i);
            assert_eq!(source.timestamp_us(), i as i64 * 200_000);
        }
        assert!(source.grab().unwrap().is_none());
    }

    #[test]
    fn open_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_segment");
        std::fs::write(&path, b"garbage bytes").unwrap();
        assert!(RawFileSource::open(&path).is_err());
    }
}
