use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use valley_contracts::jobs::{Attribution, ImageRef, TransformOutput};

use super::{StyleTransformer, TransformRequest};

const DRYRUN_MAX_EDGE: u32 = 512;

const MASTER_WORKS: &[(&str, &str, &str)] = &[
    ("vangogh-master", "Vincent van Gogh", "The Starry Night"),
    ("klimt-master", "Gustav Klimt", "The Kiss"),
    ("munch-master", "Edvard Munch", "The Scream"),
    ("matisse-master", "Henri Matisse", "The Dance"),
    ("chagall-master", "Marc Chagall", "I and the Village"),
    ("frida-master", "Frida Kahlo", "The Two Fridas"),
    ("lichtenstein-master", "Roy Lichtenstein", "Whaam!"),
];

/// Offline transformer: paints a flat colour derived from the photo and the
/// style so every (photo, style) pair renders the same way twice.
#[derive(Debug, Clone, Default)]
pub struct DryrunTransformer {
    latency: Option<Duration>,
}

impl DryrunTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps before answering, to make concurrency observable.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }
}

impl StyleTransformer for DryrunTransformer {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn transform(&self, request: &TransformRequest) -> Result<TransformOutput> {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        let (width, height) = request.photo.dimensions();
        let (width, height) = fit_within(width, height, DRYRUN_MAX_EDGE);
        let (r, g, b) = color_for(&request.style_id, request.photo.digest());

        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .with_context(|| format!("failed to encode dryrun render for {}", request.style_id))?;

        let attribution = MASTER_WORKS
            .iter()
            .find(|(style_id, _, _)| *style_id == request.style_id)
            .map(|(_, artist, work)| Attribution {
                artist: Some((*artist).to_string()),
                work: Some((*work).to_string()),
            });

        Ok(TransformOutput {
            image: ImageRef::inline("image/png", encoded),
            attribution,
        })
    }
}

fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    if longest <= max_edge {
        return (width.max(1), height.max(1));
    }
    let scale = max_edge as f64 / longest as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

fn color_for(style_id: &str, photo_digest: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(style_id.as_bytes());
    hasher.update(photo_digest.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
