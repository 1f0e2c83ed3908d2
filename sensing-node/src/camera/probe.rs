//! Startup device discovery.
//!
//! Every candidate index is probed on its own thread and the first one that
//! opens and yields a frame wins. The whole probe is bounded by one timeout,
//! not one timeout per candidate. Probes still running at the deadline are
//! left to finish on their own threads: they release their driver, log the
//! late answer and discard it.

use crossbeam::channel::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::CameraFactory;
use crate::config::CameraConfig;

pub fn probe_devices(
    factory: Arc<dyn CameraFactory>,
    candidates: &[u32],
    timeout: Duration,
) -> Option<u32> {
    if candidates.is_empty() {
        return None;
    }

    let deadline = Instant::now() + timeout;
    let (tx, rx) = channel::unbounded::<(u32, bool)>();
    for &index in candidates {
        let tx = tx.clone();
        let factory = Arc::clone(&factory);
        let spawned = thread::Builder::new()
            .name(format!("camera-probe-{}", index))
            .spawn(move || {
                let started = Instant::now();
                let mut driver = factory.create();
                let ok = driver.open(index) && driver.read().is_some();
                driver.release();
                if Instant::now() > deadline {
                    warn!(
                        "Camera probe {} answered after {:?} (ok={}); device looks hung, result ignored",
                        index,
                        started.elapsed(),
                        ok
                    );
                }
                let _ = tx.send((index, ok));
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn probe for camera {}: {}", index, e);
        }
    }
    // Channel disconnects once every probe thread has reported.
    drop(tx);

    loop {
        match rx.recv_deadline(deadline) {
            Ok((index, true)) => {
                debug!("Camera probe {} succeeded", index);
                return Some(index);
            }
            Ok((index, false)) => debug!("Camera probe {} failed", index),
            Err(RecvTimeoutError::Timeout) => {
                warn!("Camera probing timed out after {:?}", timeout);
                return None;
            }
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// Picks the device to open: an external camera when one answers, the
/// configured `device_id` otherwise.
pub fn select_device(config: &CameraConfig, factory: Arc<dyn CameraFactory>) -> u32 {
    if !config.prefer_external {
        return config.device_id;
    }

    let candidates = config.probe_candidates();
    info!(
        "Scanning for external USB cameras (checking {} devices)...",
        candidates.len()
    );
    match probe_devices(factory, &candidates, config.probe_timeout()) {
        Some(index) => {
            info!("External USB camera detected at index {}. Using it.", index);
            index
        }
        None => {
            info!(
                "No external USB camera found. Using default camera index {}",
                config.device_id
            );
            config.device_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraDriver;
    use std::sync::atomic::{AtomicU32, Ordering};
    use watchpost_common::PixelBuffer;

    /// Index 1 hangs far past any timeout, index 2 answers after a short
    /// delay, anything else refuses to open.
    struct DelayedCamera {
        index: Option<u32>,
    }

    impl CameraDriver for DelayedCamera {
        fn open(&mut self, device_index: u32) -> bool {
            match device_index {
                1 => {
                    thread::sleep(Duration::from_secs(5));
                    true
                }
                2 => {
                    thread::sleep(Duration::from_millis(50));
                    self.index = Some(2);
                    true
                }
                _ => false,
            }
        }

        fn configure(&mut self, _width: u32, _height: u32, _fps: u32) {}

        fn read(&mut self) -> Option<PixelBuffer> {
            self.index.map(|_| PixelBuffer::blank(2, 2))
        }

        fn release(&mut self) {}
    }

    fn factory() -> Arc<dyn CameraFactory> {
        Arc::new(|| Box::new(DelayedCamera { index: None }) as Box<dyn CameraDriver>)
    }

    #[test]
    fn test_probes_run_in_parallel() {
        let timeout = Duration::from_millis(400);
        let started = Instant::now();
        let found = probe_devices(factory(), &[1, 2], timeout);
        assert_eq!(found, Some(2));
        assert!(started.elapsed() < timeout);
    }

    #[test]
    fn test_hanging_probe_bounded_by_one_timeout() {
        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        assert_eq!(probe_devices(factory(), &[1, 1, 1], timeout), None);
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout * 2, "took {:?}", elapsed);
    }

    #[test]
    fn test_all_refusing_returns_early() {
        let started = Instant::now();
        assert_eq!(probe_devices(factory(), &[3, 4, 5], Duration::from_secs(2)), None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_select_falls_back_to_default() {
        let config = CameraConfig {
            device_id: 0,
            probe_limit: 1,
            ..CameraConfig::default()
        };
        assert_eq!(select_device(&config, factory()), 0);

        let config = CameraConfig {
            device_id: 7,
            prefer_external: false,
            ..CameraConfig::default()
        };
        assert_eq!(select_device(&config, factory()), 7);
    }

    /// Opens after `delay`, counting releases.
    struct SlowCamera {
        delay: Duration,
        releases: Arc<AtomicU32>,
    }

    impl CameraDriver for SlowCamera {
        fn open(&mut self, _device_index: u32) -> bool {
            thread::sleep(self.delay);
            true
        }

        fn configure(&mut self, _width: u32, _height: u32, _fps: u32) {}

        fn read(&mut self) -> Option<PixelBuffer> {
            Some(PixelBuffer::blank(2, 2))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_late_probe_still_releases_its_driver() {
        let releases = Arc::new(AtomicU32::new(0));
        let factory: Arc<dyn CameraFactory> = {
            let releases = Arc::clone(&releases);
            Arc::new(move || {
                Box::new(SlowCamera {
                    delay: Duration::from_millis(300),
                    releases: Arc::clone(&releases),
                }) as Box<dyn CameraDriver>
            })
        };

        assert_eq!(probe_devices(factory, &[1], Duration::from_millis(50)), None);
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        let waited = Instant::now();
        while releases.load(Ordering::SeqCst) == 0 && waited.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
