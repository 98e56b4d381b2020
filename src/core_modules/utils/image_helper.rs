// THEORY:
// The `image_helper` module is the engine's image-file plumbing. It decodes image
// files into `Frame`s, encodes frames back to PNG/JPEG, and provides the
// file-backed collaborators used by the tester harness.
//
// Key architectural principles:
// 1.  **RGBA everywhere**: Whatever the file's color type, it becomes an RGBA8
//     frame. JPEG output drops alpha.
// 2.  **Off the runtime**: Decoding and encoding run on the blocking pool.
// 3.  **Replay is lossless**: `ImageSequenceSource` only advances past a file once
//     a capture of it completes, so a capture dropped by a timeout is retried on
//     the same file rather than skipping it.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use tokio::task::JoinError;
use tracing::debug;

use crate::collaborators::{FrameSource, ScreenshotStore};
use crate::core_modules::frame::Frame;
use crate::core_modules::percent::Percent;
use crate::error::{Result, SentinelError};

/// Converts a decoded image of any color type into an RGBA frame.
pub fn frame_from_image(image: DynamicImage) -> Result<Frame> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    Frame::new(width, height, rgba.into_raw())
}

/// Decodes an image file into a frame.
pub fn load_frame(path: &Path) -> Result<Frame> {
    frame_from_image(image::open(path)?)
}

fn to_rgba_image(frame: &Frame) -> Result<RgbaImage> {
    RgbaImage::from_raw(frame.width(), frame.height(), frame.as_bytes().to_vec())
        .ok_or_else(|| SentinelError::InvalidFrame("buffer does not match dimensions".into()))
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let output = File::create(path).map_err(image::ImageError::IoError)?;
    Ok(BufWriter::new(output))
}

/// Writes a frame as a lossless PNG.
pub fn save_png(path: &Path, frame: &Frame) -> Result<()> {
    let encoder = PngEncoder::new(create(path)?);
    encoder.write_image(
        frame.as_bytes(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(())
}

/// Writes a frame as a JPEG. The alpha channel is dropped.
pub fn save_jpeg(path: &Path, frame: &Frame, quality: Percent) -> Result<()> {
    let rgb = DynamicImage::ImageRgba8(to_rgba_image(frame)?).to_rgb8();
    let quality = quality.value().round().clamp(1.0, 100.0) as u8;
    let encoder = JpegEncoder::new_with_quality(create(path)?, quality);
    encoder.write_image(rgb.as_raw(), frame.width(), frame.height(), ExtendedColorType::Rgb8)?;
    Ok(())
}

fn is_readable_image(path: &Path) -> bool {
    ImageFormat::from_path(path)
        .map(|format| format.can_read())
        .unwrap_or(false)
}

/// Decodes on the blocking pool so large images do not stall the runtime.
async fn decode_blocking(path: PathBuf) -> Result<Frame> {
    tokio::task::spawn_blocking(move || load_frame(&path))
        .await
        .map_err(|e| SentinelError::CaptureFailed(format!("decoder task failed: {}", e)))?
}

/// Re-reads one image file on every capture. Pairs with an external process that
/// keeps overwriting the file (a webcam snapshot tool, for instance).
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    path: PathBuf,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for ImageFileSource {
    fn capture(&self) -> BoxFuture<'_, Result<Frame>> {
        decode_blocking(self.path.clone()).boxed()
    }
}

/// Replays a fixed list of image files, one per capture, then fails every
/// capture once the list is used up. A capture dropped before it completes
/// leaves its file queued for the next one.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: AtomicUsize,
}

impl ImageSequenceSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Every readable image in `dir`, in file-name order. Other files are ignored.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SentinelError::CaptureFailed(format!("cannot list {}: {}", dir.display(), e))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && is_readable_image(path))
            .collect();
        paths.sort();
        Ok(Self::new(paths))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Frames not yet handed out.
    pub fn remaining(&self) -> usize {
        self.paths
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

impl FrameSource for ImageSequenceSource {
    fn capture(&self) -> BoxFuture<'_, Result<Frame>> {
        async move {
            let index = self.cursor.load(Ordering::SeqCst);
            let Some(path) = self.paths.get(index).cloned() else {
                return Err(SentinelError::CaptureFailed("image sequence exhausted".into()));
            };
            debug!(path = %path.display(), index, "replaying frame");
            let decoded = decode_blocking(path).await;
            // Only a completed capture consumes its file, undecodable ones included.
            self.cursor.fetch_max(index + 1, Ordering::SeqCst);
            decoded
        }
        .boxed()
    }
}

fn encoder_task_failed(e: JoinError) -> SentinelError {
    image::ImageError::IoError(std::io::Error::other(format!("encoder task failed: {}", e))).into()
}

/// Saves alert screenshots as `<dir>/<event id>.jpg`.
#[derive(Debug, Clone)]
pub struct JpegDirectoryStore {
    dir: PathBuf,
}

impl JpegDirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ScreenshotStore for JpegDirectoryStore {
    fn reference_for(&self, event_id: &str) -> String {
        self.dir
            .join(format!("{}.jpg", event_id))
            .display()
            .to_string()
    }

    fn save<'a>(&'a self, reference: &'a str, frame: Frame, quality: Percent) -> BoxFuture<'a, Result<()>> {
        let path = PathBuf::from(reference);
        async move {
            tokio::task::spawn_blocking(move || save_jpeg(&path, &frame, quality))
                .await
                .map_err(encoder_task_failed)?
        }
        .boxed()
    }
}
