use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};

const PREVIEW_MAX_EDGE: u32 = 256;

/// The uploaded photo. Bytes are shared, never mutated; replacing the photo
/// means building a new `Photo`.
#[derive(Clone, PartialEq, Eq)]
pub struct Photo {
    data: Arc<[u8]>,
    mime: &'static str,
    width: u32,
    height: u32,
    preview: Arc<[u8]>,
    digest: String,
}

impl Photo {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("cannot use {}", path.display()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let Ok(format) = image::guess_format(&bytes) else {
            bail!("only image files may be uploaded");
        };
        let mime = mime_for_format(format);
        let decoded = ImageReader::with_format(Cursor::new(bytes.as_slice()), format)
            .decode()
            .context("image could not be decoded")?;

        let thumbnail = decoded.thumbnail(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE);
        let mut preview = Vec::new();
        thumbnail
            .write_to(&mut Cursor::new(&mut preview), ImageFormat::Png)
            .context("failed encoding photo preview")?;

        let digest = hex::encode(Sha256::digest(&bytes));
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            data: Arc::from(bytes),
            mime,
            preview: Arc::from(preview),
            digest,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// PNG thumbnail, longest edge at most 256px.
    pub fn preview_png(&self) -> &[u8] {
        &self.preview
    }

    /// Hex sha256 of the original bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Photo")
            .field("mime", &self.mime)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("digest", &&self.digest[..12.min(self.digest.len())])
            .finish()
    }
}

fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        _ => "image/png",
    }
}
