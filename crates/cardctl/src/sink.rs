//! Output for completed responses: error texts go to stdout, faces are
//! written as PNG files when an output directory is configured.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;

use cardstream_core::wire::{ClassifiedPayload, RequestItem, FACE_HEIGHT, FACE_WIDTH};
use cardstream_services::{CompletedResponse, PayloadSink};

pub struct ImageWriter {
    out_dir: Option<PathBuf>,
    written: Vec<PathBuf>,
    images: usize,
    errors: usize,
}

impl ImageWriter {
    pub fn new(out_dir: Option<PathBuf>) -> Self {
        Self {
            out_dir,
            written: Vec::new(),
            images: 0,
            errors: 0,
        }
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn images(&self) -> usize {
        self.images
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    fn save_faces(&mut self, response: &CompletedResponse, faces: &[&[u8]]) {
        let Some(dir) = self.out_dir.clone() else {
            tracing::debug!(stream = response.stream, faces = faces.len(), "image received");
            return;
        };
        let stem = file_stem(&response.request, response.stream);
        for (i, face) in faces.iter().enumerate() {
            let name = if faces.len() == 1 {
                format!("{stem}.png")
            } else {
                format!("{stem}-{}.png", if i == 0 { "front" } else { "back" })
            };
            let path = dir.join(name);
            match write_png(&path, face) {
                Ok(()) => {
                    println!("{}", path.display());
                    self.written.push(path);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to save face"),
            }
        }
    }
}

impl PayloadSink for ImageWriter {
    fn deliver(&mut self, response: CompletedResponse) {
        match &response.outcome {
            Ok(ClassifiedPayload::SingleImage(face)) => {
                self.images += 1;
                self.save_faces(&response, &[&face[..]]);
            }
            Ok(ClassifiedPayload::DualImage { front, back }) => {
                self.images += 1;
                self.save_faces(&response, &[&front[..], &back[..]]);
            }
            Ok(ClassifiedPayload::ErrorText(text)) => {
                self.errors += 1;
                println!("{text}");
            }
            Err(e) => {
                self.errors += 1;
                tracing::warn!(stream = response.stream, request = %response.request, error = %e, "no usable response");
            }
        }
    }
}

fn write_png(path: &Path, face: &[u8]) -> Result<()> {
    let image = RgbImage::from_raw(FACE_WIDTH, FACE_HEIGHT, face.to_vec())
        .context("face has the wrong number of bytes")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// File name for a response. Random draws are told apart by stream.
fn file_stem(request: &RequestItem, stream: u64) -> String {
    match request {
        RequestItem::Random => format!("random-{stream}"),
        RequestItem::Named(name) => {
            let cleaned: String = name
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
                .collect();
            format!("{cleaned}-{stream}")
        }
    }
}
