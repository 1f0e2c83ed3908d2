use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use watchpost_common::{Frame, PixelBuffer};

use crate::clock::Clock;
use crate::config::CameraConfig;
use crate::error::{AgentError, Result};

pub mod probe;
pub mod synthetic;

pub use probe::{probe_devices, select_device};
pub use synthetic::SyntheticCamera;

/// Blocking camera driver. Implementations wrap whatever capture backend the
/// platform provides; every call may fail on flaky hardware.
pub trait CameraDriver: Send {
    fn open(&mut self, device_index: u32) -> bool;
    fn configure(&mut self, width: u32, height: u32, fps: u32);
    fn read(&mut self) -> Option<PixelBuffer>;
    fn release(&mut self);
}

/// Builds independent driver instances, one per concurrent probe.
pub trait CameraFactory: Send + Sync {
    fn create(&self) -> Box<dyn CameraDriver>;
}

impl<F> CameraFactory for F
where
    F: Fn() -> Box<dyn CameraDriver> + Send + Sync,
{
    fn create(&self) -> Box<dyn CameraDriver> {
        self()
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Active,
    Reconnecting,
    Disabled,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Active => write!(f, "active"),
            SourceState::Reconnecting => write!(f, "reconnecting"),
            SourceState::Disabled => write!(f, "disabled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub warmup_frames: u32,
    pub max_attempts: u32,
    pub reconnect_delay: Duration,
}

impl SourceSettings {
    pub fn from_config(config: &CameraConfig, device_index: u32) -> Self {
        Self {
            device_index,
            width: config.width,
            height: config.height,
            fps: config.fps,
            warmup_frames: config.warmup_frames,
            max_attempts: config.reconnect_max_attempts.max(1),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// Camera acquisition with bounded auto-reconnect.
///
/// Every call that yields no frame counts as one failure. A failure below the
/// budget performs exactly one reconnect attempt (release, pause, reopen,
/// reconfigure). The `max_attempts`-th consecutive failure disables the source
/// without reopening, and it stays disabled until [`FrameSource::reset`].
pub struct FrameSource {
    driver: Box<dyn CameraDriver>,
    settings: SourceSettings,
    clock: Arc<dyn Clock>,
    state: SourceState,
    attempts: u32,
    sequence: u64,
    reconnects: u64,
}

impl FrameSource {
    pub fn new(driver: Box<dyn CameraDriver>, settings: SourceSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            driver,
            settings,
            clock,
            state: SourceState::Reconnecting,
            attempts: 0,
            sequence: 0,
            reconnects: 0,
        }
    }

    /// Opens the device and discards warm-up frames.
    ///
    /// On failure the source is left in `Reconnecting`, so later `get_frame`
    /// calls keep trying within the attempt budget.
    pub fn start(&mut self) -> Result<()> {
        info!("Opening camera {}...", self.settings.device_index);
        if !self.open_and_configure() {
            self.state = SourceState::Reconnecting;
            return Err(AgentError::CameraError(format!(
                "failed to open camera {}",
                self.settings.device_index
            )));
        }

        for _ in 0..self.settings.warmup_frames {
            let _ = self.driver.read();
        }
        debug!("Camera warmup complete ({} frames discarded)", self.settings.warmup_frames);

        self.state = SourceState::Active;
        info!(
            "Camera started: id={}, resolution={}x{}, fps={}",
            self.settings.device_index, self.settings.width, self.settings.height, self.settings.fps
        );
        Ok(())
    }

    pub fn get_frame(&mut self) -> Option<Frame> {
        match self.state {
            SourceState::Disabled => None,
            SourceState::Active => {
                match self.driver.read() {
                    Some(image) if image.is_well_formed() => {
                        self.attempts = 0;
                        self.sequence += 1;
                        return Some(Frame::new(self.sequence, image));
                    }
                    Some(image) => warn!(
                        "Camera returned malformed buffer ({}x{}, {} bytes)",
                        image.width,
                        image.height,
                        image.data.len()
                    ),
                    None => warn!("Failed to read frame from camera {}", self.settings.device_index),
                }
                if self.record_failure() {
                    self.reconnect_once();
                }
                None
            }
            SourceState::Reconnecting => {
                if !self.reconnect_once() {
                    self.record_failure();
                }
                None
            }
        }
    }

    /// Counts one failed call. Returns false once the budget is spent and the
    /// source has been disabled.
    fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        if self.attempts >= self.settings.max_attempts {
            self.disable();
            return false;
        }
        true
    }

    fn reconnect_once(&mut self) -> bool {
        self.state = SourceState::Reconnecting;
        self.reconnects += 1;
        warn!(
            "Reconnecting camera {} (attempt {}/{})",
            self.settings.device_index,
            self.attempts + 1,
            self.settings.max_attempts
        );

        self.driver.release();
        self.clock.sleep(self.settings.reconnect_delay);

        if self.open_and_configure() {
            self.state = SourceState::Active;
            info!("Camera {} reconnected", self.settings.device_index);
            true
        } else {
            false
        }
    }

    fn open_and_configure(&mut self) -> bool {
        if !self.driver.open(self.settings.device_index) {
            return false;
        }
        self.driver
            .configure(self.settings.width, self.settings.height, self.settings.fps);
        true
    }

    fn disable(&mut self) {
        self.driver.release();
        self.state = SourceState::Disabled;
        error!(
            "Camera {} disabled after {} failed attempts; operator reset required",
            self.settings.device_index, self.settings.max_attempts
        );
    }

    /// Operator action: re-arms a disabled source with a fresh attempt budget.
    pub fn reset(&mut self) {
        if self.state == SourceState::Disabled {
            info!("Camera {} re-enabled by operator", self.settings.device_index);
            self.state = SourceState::Reconnecting;
        }
        self.attempts = 0;
    }

    pub fn stop(&mut self) {
        self.driver.release();
        self.state = SourceState::Disabled;
        info!("Camera stopped");
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn device_index(&self) -> u32 {
        self.settings.device_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls {
        opens: u32,
        releases: u32,
        configures: u32,
        reads: u32,
    }

    /// Scripted driver: `reads` pops one outcome per call (true = frame).
    struct ScriptedCamera {
        calls: Arc<Mutex<Calls>>,
        reads: VecDeque<bool>,
        opens: VecDeque<bool>,
    }

    impl ScriptedCamera {
        fn new(reads: &[bool], opens: &[bool]) -> (Self, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            let camera = Self {
                calls: Arc::clone(&calls),
                reads: reads.iter().copied().collect(),
                opens: opens.iter().copied().collect(),
            };
            (camera, calls)
        }
    }

    impl CameraDriver for ScriptedCamera {
        fn open(&mut self, _device_index: u32) -> bool {
            self.calls.lock().unwrap().opens += 1;
            self.opens.pop_front().unwrap_or(false)
        }

        fn configure(&mut self, _width: u32, _height: u32, _fps: u32) {
            self.calls.lock().unwrap().configures += 1;
        }

        fn read(&mut self) -> Option<PixelBuffer> {
            self.calls.lock().unwrap().reads += 1;
            self.reads
                .pop_front()
                .unwrap_or(false)
                .then(|| PixelBuffer::blank(4, 4))
        }

        fn release(&mut self) {
            self.calls.lock().unwrap().releases += 1;
        }
    }

    fn settings(max_attempts: u32) -> SourceSettings {
        SourceSettings {
            device_index: 0,
            width: 4,
            height: 4,
            fps: 30,
            warmup_frames: 0,
            max_attempts,
            reconnect_delay: Duration::from_millis(500),
        }
    }

    fn started(camera: ScriptedCamera, max_attempts: u32) -> (FrameSource, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let mut source = FrameSource::new(Box::new(camera), settings(max_attempts), clock.clone());
        source.start().unwrap();
        (source, clock)
    }

    #[test]
    fn test_successful_reads_have_increasing_sequence() {
        let (camera, _) = ScriptedCamera::new(&[true, true, true], &[true]);
        let (mut source, _) = started(camera, 3);
        let seqs: Vec<u64> = (0..3).filter_map(|_| source.get_frame()).map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(source.state(), SourceState::Active);
    }

    #[test]
    fn test_disables_after_max_failed_reads() {
        let (camera, calls) = ScriptedCamera::new(&[], &[true]);
        let (mut source, clock) = started(camera, 3);

        for _ in 0..3 {
            assert!(source.get_frame().is_none());
        }
        assert_eq!(source.state(), SourceState::Disabled);
        // start + one reopen per failed call
        assert_eq!(calls.lock().unwrap().opens, 4);
        assert_eq!(clock.sleeps().len(), 3);

        for _ in 0..5 {
            assert!(source.get_frame().is_none());
        }
        assert_eq!(calls.lock().unwrap().opens, 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn test_one_reconnect_attempt_per_call() {
        let (camera, calls) = ScriptedCamera::new(&[false, true], &[true, true]);
        let (mut source, clock) = started(camera, 3);

        assert!(source.get_frame().is_none());
        {
            let calls = calls.lock().unwrap();
            assert_eq!(calls.opens, 2);
            assert_eq!(calls.releases, 1);
            assert_eq!(calls.configures, 2);
        }
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
        assert_eq!(source.state(), SourceState::Active);
        assert_eq!(source.attempts(), 1);

        let frame = source.get_frame().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(source.attempts(), 0);
    }

    #[test]
    fn test_successful_read_resets_budget() {
        // fail, fail, ok, fail, fail -> never three in a row
        let (camera, _) =
            ScriptedCamera::new(&[false, false, true, false, false], &[true, true, true, true, true]);
        let (mut source, _) = started(camera, 3);
        for _ in 0..5 {
            source.get_frame();
        }
        assert_eq!(source.state(), SourceState::Active);
        assert_eq!(source.attempts(), 2);
    }

    #[test]
    fn test_reopen_ok_but_reads_keep_failing_disables_at_budget() {
        let (camera, calls) = ScriptedCamera::new(&[], &[true; 10]);
        let (mut source, clock) = started(camera, 3);

        assert!(source.get_frame().is_none());
        assert!(source.get_frame().is_none());
        assert_eq!(source.state(), SourceState::Active);

        assert!(source.get_frame().is_none());
        assert_eq!(source.state(), SourceState::Disabled);
        // start + one reopen for each of the first two failures
        assert_eq!(calls.lock().unwrap().opens, 3);
        assert_eq!(calls.lock().unwrap().reads, 3);
        assert_eq!(clock.sleeps().len(), 2);

        assert!(source.get_frame().is_none());
        assert_eq!(calls.lock().unwrap().opens, 3);
        assert_eq!(calls.lock().unwrap().reads, 3);
    }

    #[test]
    fn test_failed_start_then_recovery() {
        let (camera, _) = ScriptedCamera::new(&[true], &[false, true]);
        let clock = Arc::new(ManualClock::new());
        let mut source = FrameSource::new(Box::new(camera), settings(3), clock);
        assert!(matches!(source.start(), Err(AgentError::CameraError(_))));
        assert_eq!(source.state(), SourceState::Reconnecting);

        assert!(source.get_frame().is_none());
        assert_eq!(source.state(), SourceState::Active);
        assert!(source.get_frame().is_some());
    }

    #[test]
    fn test_reset_rearms_disabled_source() {
        let (camera, calls) = ScriptedCamera::new(&[], &[true, true]);
        let (mut source, _) = started(camera, 1);
        source.get_frame();
        assert_eq!(source.state(), SourceState::Disabled);
        assert_eq!(calls.lock().unwrap().opens, 1);

        source.reset();
        assert_eq!(source.state(), SourceState::Reconnecting);
        assert_eq!(source.attempts(), 0);
        assert!(source.get_frame().is_none());
        assert_eq!(source.state(), SourceState::Active);
    }
}
