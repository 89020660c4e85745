use std::fmt::Debug;
use std::sync::Arc;

/// The flow control window of a transport: At most `channels` requests are outstanding at any
///  time. Once that ceiling is hit, sending resumes only after the number of outstanding
///  requests has dropped to `intermediate_waits`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Window {
    pub channels: usize,
    pub intermediate_waits: usize,
}
impl Window {
    /// A window with the usual gap of 8 between the ceiling and the resume threshold
    pub fn with_channels(channels: usize) -> Window {
        Window {
            channels,
            intermediate_waits: channels.saturating_sub(8),
        }
    }

    pub fn is_saturated(&self, in_progress: usize) -> bool {
        in_progress >= self.channels
    }
}

/// Strategy for sizing a transport's window the first time its connection is found to have a
///  response waiting, i.e. after the device started answering. The number of requests in
///  flight at that point approximates the depth of the device's receive buffer.
pub trait WindowCalibration: Debug + Send + Sync + 'static {
    fn calibrate(&self, in_progress: usize) -> Window;
}

/// `channels = max(min_channels, in_progress + headroom)`, resuming at `channels - headroom`
#[derive(Debug, Copy, Clone)]
pub struct ReadinessProbeCalibration {
    pub min_channels: usize,
    pub headroom: usize,
}
impl Default for ReadinessProbeCalibration {
    fn default() -> Self {
        ReadinessProbeCalibration {
            min_channels: 12,
            headroom: 8,
        }
    }
}
impl WindowCalibration for ReadinessProbeCalibration {
    fn calibrate(&self, in_progress: usize) -> Window {
        let channels = self.min_channels.max(in_progress + self.headroom);
        Window {
            channels,
            intermediate_waits: channels.saturating_sub(self.headroom),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WindowSizing {
    Fixed(Window),
    Calibrated(Arc<dyn WindowCalibration>),
}
impl Default for WindowSizing {
    fn default() -> Self {
        WindowSizing::Calibrated(Arc::new(ReadinessProbeCalibration::default()))
    }
}

/// A transport's window state: either fixed from the start, or uncalibrated (unbounded) until
///  the calibration strategy is applied once.
#[derive(Debug)]
pub struct WindowState {
    window: Option<Window>,
    calibration: Option<Arc<dyn WindowCalibration>>,
}
impl WindowState {
    pub fn new(sizing: &WindowSizing) -> WindowState {
        match sizing {
            WindowSizing::Fixed(window) => WindowState {
                window: Some(*window),
                calibration: None,
            },
            WindowSizing::Calibrated(calibration) => WindowState {
                window: None,
                calibration: Some(calibration.clone()),
            },
        }
    }

    pub fn window(&self) -> Option<Window> {
        self.window
    }

    pub fn needs_calibration(&self) -> bool {
        self.window.is_none()
    }

    /// Sizes the window if it is not sized yet. Returns the new window if this call did the
    ///  calibration.
    pub fn calibrate(&mut self, in_progress: usize) -> Option<Window> {
        if self.window.is_some() {
            return None;
        }
        let window = self.calibration.as_ref()?
            .calibrate(in_progress);
        self.window = Some(window);
        Some(window)
    }

    pub fn is_saturated(&self, in_progress: usize) -> bool {
        self.window
            .map(|w| w.is_saturated(in_progress))
            .unwrap_or(false)
    }

    /// number of outstanding requests to drain down to before sending again
    pub fn resume_threshold(&self) -> usize {
        self.window
            .map(|w| w.intermediate_waits)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::idle(0, 12, 4)]
    #[case::below_minimum(3, 12, 4)]
    #[case::at_minimum(4, 12, 4)]
    #[case::above_minimum(10, 18, 10)]
    #[case::large(100, 108, 100)]
    fn test_readiness_probe_calibration(#[case] in_progress: usize, #[case] channels: usize, #[case] intermediate_waits: usize) {
        let window = ReadinessProbeCalibration::default().calibrate(in_progress);
        assert_eq!(window, Window { channels, intermediate_waits });
        assert!(window.channels >= in_progress);
    }

    #[test]
    fn test_calibrate_once() {
        let mut state = WindowState::new(&WindowSizing::default());
        assert!(state.needs_calibration());
        assert!(!state.is_saturated(1000));
        assert_eq!(state.resume_threshold(), 0);

        assert_eq!(state.calibrate(10), Some(Window { channels: 18, intermediate_waits: 10 }));
        assert_eq!(state.calibrate(30), None);
        assert_eq!(state.window(), Some(Window { channels: 18, intermediate_waits: 10 }));
        assert!(state.is_saturated(18));
        assert!(!state.is_saturated(17));
        assert_eq!(state.resume_threshold(), 10);
    }

    #[test]
    fn test_fixed() {
        let mut state = WindowState::new(&WindowSizing::Fixed(Window { channels: 8, intermediate_waits: 7 }));
        assert!(!state.needs_calibration());
        assert_eq!(state.calibrate(3), None);
        assert!(state.is_saturated(8));
        assert_eq!(state.resume_threshold(), 7);
    }

    #[test]
    fn test_with_channels() {
        assert_eq!(Window::with_channels(12), Window { channels: 12, intermediate_waits: 4 });
        assert_eq!(Window::with_channels(5), Window { channels: 5, intermediate_waits: 0 });
    }
}
