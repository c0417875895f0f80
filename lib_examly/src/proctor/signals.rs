//! Signal kinds and the pure classification rules behind each capture point.

use std::fmt;
use std::time::{Duration, Instant};

/// Hidden time above which a return to the page counts as screen recording.
pub const SCREEN_RECORD_THRESHOLD_MS: u64 = 2500;
/// Expected spacing of drift ticks.
pub const DRIFT_PERIOD: Duration = Duration::from_millis(1000);
/// Tick spacing above which the page is assumed to have been paused.
pub const DRIFT_THRESHOLD_MS: u64 = 1700;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheatSignal {
    TabSwitch,
    VisibilityHidden,
    ScreenRecordSuspect,
    ScreenshotSuspect,
    WindowBlur,
    WindowFocus,
    ContextMenu,
    Copy,
    Paste,
    TextSelection,
    ScreenshotKey,
    ShortcutBlock,
    DevtoolsShortcut,
    DebuggerPauseSuspect,
}

impl CheatSignal {
    /// Wire name used in cheat-log submissions.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheatSignal::TabSwitch => "TAB_SWITCH",
            CheatSignal::VisibilityHidden => "VISIBILITY_HIDDEN",
            CheatSignal::ScreenRecordSuspect => "SCREEN_RECORD_SUSPECT",
            CheatSignal::ScreenshotSuspect => "SCREENSHOT_SUSPECT",
            CheatSignal::WindowBlur => "WINDOW_BLUR",
            CheatSignal::WindowFocus => "WINDOW_FOCUS",
            CheatSignal::ContextMenu => "CONTEXT_MENU",
            CheatSignal::Copy => "COPY",
            CheatSignal::Paste => "PASTE",
            CheatSignal::TextSelection => "TEXT_SELECTION",
            CheatSignal::ScreenshotKey => "SCREENSHOT_KEY",
            CheatSignal::ShortcutBlock => "SHORTCUT_BLOCK",
            CheatSignal::DevtoolsShortcut => "DEVTOOLS_SHORTCUT",
            CheatSignal::DebuggerPauseSuspect => "DEBUGGER_PAUSE_SUSPECT",
        }
    }
}

impl fmt::Display for CheatSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a return from the background by how long the page was hidden.
/// Exactly 2500 ms is still a screenshot suspect.
pub fn classify_hidden(hidden_ms: u64) -> CheatSignal {
    if hidden_ms > SCREEN_RECORD_THRESHOLD_MS {
        CheatSignal::ScreenRecordSuspect
    } else {
        CheatSignal::ScreenshotSuspect
    }
}

/// A key-down as seen by the capture layer. `key` follows the DOM
/// `KeyboardEvent.key` naming (`"p"`, `"F12"`, `"PrintScreen"`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPress {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl KeyPress {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// Returns the signal for an intercepted shortcut, or `None` when the key is
/// allowed through. Cmd counts as Ctrl.
pub fn classify_key(press: &KeyPress) -> Option<CheatSignal> {
    let key = press.key.to_lowercase();
    let ctrl = press.ctrl || press.meta;

    if key == "printscreen" {
        return Some(CheatSignal::ScreenshotKey);
    }
    if ctrl && matches!(key.as_str(), "p" | "s" | "u") {
        return Some(CheatSignal::ShortcutBlock);
    }
    if key == "f12" || (ctrl && press.shift && matches!(key.as_str(), "i" | "j" | "c")) {
        return Some(CheatSignal::DevtoolsShortcut);
    }
    None
}

/// Flags stalls of a periodic tick, which is what a paused debugger looks like
/// from inside the page.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    threshold_ms: u64,
    last: Instant,
}

impl DriftDetector {
    pub fn new(start: Instant) -> Self {
        Self::with_threshold(start, DRIFT_THRESHOLD_MS)
    }

    pub fn with_threshold(start: Instant, threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            last: start,
        }
    }

    /// Records a tick; returns the elapsed milliseconds if they exceed the threshold.
    pub fn tick(&mut self, now: Instant) -> Option<u64> {
        let diff = now.saturating_duration_since(self.last).as_millis() as u64;
        self.last = now;
        (diff > self.threshold_ms).then_some(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_duration_boundary_is_a_screenshot() {
        assert_eq!(classify_hidden(0), CheatSignal::ScreenshotSuspect);
        assert_eq!(classify_hidden(2500), CheatSignal::ScreenshotSuspect);
        assert_eq!(classify_hidden(2501), CheatSignal::ScreenRecordSuspect);
    }

    #[test]
    fn intercepted_shortcuts() {
        assert_eq!(classify_key(&KeyPress::new("PrintScreen")), Some(CheatSignal::ScreenshotKey));
        assert_eq!(classify_key(&KeyPress::new("p").ctrl()), Some(CheatSignal::ShortcutBlock));
        assert_eq!(classify_key(&KeyPress::new("S").meta()), Some(CheatSignal::ShortcutBlock));
        assert_eq!(classify_key(&KeyPress::new("u").ctrl().shift()), Some(CheatSignal::ShortcutBlock));
        assert_eq!(classify_key(&KeyPress::new("F12")), Some(CheatSignal::DevtoolsShortcut));
        assert_eq!(classify_key(&KeyPress::new("I").ctrl().shift()), Some(CheatSignal::DevtoolsShortcut));
        assert_eq!(classify_key(&KeyPress::new("j").meta().shift()), Some(CheatSignal::DevtoolsShortcut));
    }

    #[test]
    fn ordinary_keys_pass_through() {
        assert_eq!(classify_key(&KeyPress::new("p")), None);
        assert_eq!(classify_key(&KeyPress::new("i").ctrl()), None);
        assert_eq!(classify_key(&KeyPress::new("c").ctrl()), None);
        assert_eq!(classify_key(&KeyPress::new("Enter").shift()), None);
    }

    #[test]
    fn drift_detector_flags_only_long_gaps() {
        let start = Instant::now();
        let mut detector = DriftDetector::new(start);
        assert_eq!(detector.tick(start + Duration::from_millis(1000)), None);
        assert_eq!(detector.tick(start + Duration::from_millis(2700)), None);
        assert_eq!(detector.tick(start + Duration::from_millis(4500)), Some(1800));
        assert_eq!(detector.tick(start + Duration::from_millis(5500)), None);
    }

    #[test]
    fn wire_names_are_screaming_snake_case() {
        assert_eq!(CheatSignal::DebuggerPauseSuspect.to_string(), "DEBUGGER_PAUSE_SUSPECT");
        assert_eq!(CheatSignal::ScreenRecordSuspect.as_str(), "SCREEN_RECORD_SUSPECT");
    }
}
