use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, Rgba, RgbaImage};

use crate::error::{ClusterError, Result};
use crate::job::TaskResult;

/// Where and how a finished animation is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifSettings {
    pub filename: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_delay: Duration,
}

/// Encodes rendered frames as an infinitely looping animated GIF.
#[derive(Debug, Clone)]
pub struct GifWriter {
    settings: GifSettings,
}

impl GifWriter {
    pub fn new(settings: GifSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &GifSettings {
        &self.settings
    }

    /// Sort frames by id and write them to the configured file. Blocking.
    pub fn write_file(&self, results: Vec<TaskResult>) -> Result<()> {
        let file = File::create(&self.settings.filename)?;
        let mut writer = BufWriter::new(file);
        self.encode(results, &mut writer)?;
        writer.flush()?;
        tracing::info!(
            path = %self.settings.filename.display(),
            "Animation written"
        );
        Ok(())
    }

    pub fn encode<W: Write>(&self, mut results: Vec<TaskResult>, out: W) -> Result<()> {
        results.sort_by_key(TaskResult::id);
        let delay = Delay::from_saturating_duration(self.settings.frame_delay);

        let mut encoder = GifEncoder::new(out);
        encoder.set_repeat(Repeat::Infinite)?;
        for result in &results {
            let frame = self.to_frame(result)?;
            encoder.encode_frame(Frame::from_parts(frame, 0, 0, delay))?;
        }
        Ok(())
    }

    fn to_frame(&self, result: &TaskResult) -> Result<RgbaImage> {
        let GifSettings { width, height, .. } = self.settings;
        let expected = width as usize * height as usize * 3;
        if result.pixels.len() != expected {
            return Err(ClusterError::Render(format!(
                "frame {} has {} bytes, expected {}",
                result.id(),
                result.pixels.len(),
                expected
            )));
        }
        let pixels = &result.pixels;
        Ok(RgbaImage::from_fn(width, height, |x, y| {
            let i = (y as usize * width as usize + x as usize) * 3;
            Rgba([pixels[i], pixels[i + 1], pixels[i + 2], 255])
        }))
    }
}
