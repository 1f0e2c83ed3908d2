//! Snapshot encoding off the remote loop.
//!
//! JPEG encoding runs on a small rayon pool; finished payloads come back on a
//! crossbeam channel that the remote loop drains without blocking.

use crossbeam::channel::{self, Receiver, Sender};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::time::Duration;
use tracing::debug;
use watchpost_common::{Frame, PixelBuffer};

use crate::error::{AgentError, Result};

#[derive(Debug)]
pub struct EncodeOutcome {
    pub chat: i64,
    pub caption: String,
    pub result: Result<Vec<u8>>,
}

pub struct EncodePool {
    pool: rayon::ThreadPool,
    quality: u8,
    tx: Sender<EncodeOutcome>,
    rx: Receiver<EncodeOutcome>,
}

impl EncodePool {
    pub fn new(workers: usize, quality: u8) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("snapshot-encode-{}", i))
            .build()
            .map_err(|e| AgentError::EncodeError(e.to_string()))?;
        let (tx, rx) = channel::unbounded();
        Ok(Self {
            pool,
            quality: quality.clamp(1, 100),
            tx,
            rx,
        })
    }

    /// Queues `frame` for encoding. Takes the frame by value; callers pass
    /// the copy they got from SharedState.
    pub fn submit(&self, chat: i64, frame: Frame, caption: String) {
        let tx = self.tx.clone();
        let quality = self.quality;
        self.pool.spawn(move || {
            let result = encode_jpeg(&frame.image, quality);
            debug!("Encoded snapshot of frame {}", frame.sequence);
            let _ = tx.send(EncodeOutcome { chat, caption, result });
        });
    }

    /// Every finished outcome, without waiting.
    pub fn drain(&self) -> Vec<EncodeOutcome> {
        self.rx.try_iter().collect()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EncodeOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

pub fn encode_jpeg(image: &PixelBuffer, quality: u8) -> Result<Vec<u8>> {
    if !image.is_well_formed() || image.width == 0 || image.height == 0 {
        return Err(AgentError::EncodeError(format!(
            "malformed {}x{} buffer with {} bytes",
            image.width,
            image.height,
            image.data.len()
        )));
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(&image.data, image.width, image.height, ColorType::Rgb8)?;
    Ok(out)
}
