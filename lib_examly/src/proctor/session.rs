//! # Proctoring Session
//!
//! One `ProctorSession` exists per running attempt. The host feeds it the
//! page events it observes and applies the returned [`Reaction`]; the session
//! classifies each event and submits the matching cheat-log entries.
//!
//! Everything the session installs is undone when it is released or dropped,
//! whichever comes first: the drift watch is cancelled and registered release
//! hooks run exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::retrieve::cheat_log::{CheatLogEntry, CheatLogSink};

use super::signals::{classify_hidden, classify_key, CheatSignal, DriftDetector, KeyPress, DRIFT_PERIOD};
use super::watermark::watermark_text;

/// How long an overlay stays on screen.
pub const OVERLAY_LIFETIME: Duration = Duration::from_millis(1200);
/// How long the page stays blurred after a PrintScreen press.
pub const SCREENSHOT_BLUR: Duration = Duration::from_millis(900);

/// Current time in the wire format used by cheat-log entries.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Identifies the attempt being proctored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    pub attempt_id: i64,
    /// `0` means unknown and is left out of submitted entries.
    pub exam_id: i64,
    pub telegram_id: Option<i64>,
}

impl AttemptContext {
    pub fn new(attempt_id: i64, exam_id: i64) -> Self {
        Self {
            attempt_id,
            exam_id,
            telegram_id: None,
        }
    }

    pub fn with_telegram_id(mut self, telegram_id: Option<i64>) -> Self {
        self.telegram_id = telegram_id;
        self
    }

    pub fn watermark(&self, ts: &str) -> String {
        watermark_text(self.telegram_id, self.attempt_id, ts)
    }

    fn entry(&self, signal: CheatSignal, detail: Option<Value>) -> CheatLogEntry {
        CheatLogEntry {
            event: signal.as_str().to_string(),
            attempt_id: self.attempt_id,
            exam_id: (self.exam_id != 0).then_some(self.exam_id),
            ts: now_iso(),
            detail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Warn,
    Danger,
    Ok,
}

/// A transient notice shown over the exam page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub title: &'static str,
    pub description: &'static str,
    pub tone: Tone,
    pub lifetime: Duration,
}

impl Overlay {
    pub fn new(title: &'static str, description: &'static str, tone: Tone) -> Self {
        Self {
            title,
            description,
            tone,
            lifetime: OVERLAY_LIFETIME,
        }
    }

    pub fn finished() -> Self {
        Self::new("OK", "Exam finished", Tone::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurChange {
    On,
    Off,
    /// Blur now, unblur after the given duration.
    Pulse(Duration),
}

/// What the host should do in response to an observed event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reaction {
    /// Cancel the event's default action.
    pub suppress: bool,
    pub blur: Option<BlurChange>,
    pub overlay: Option<Overlay>,
}

impl Reaction {
    fn suppressed() -> Self {
        Self {
            suppress: true,
            ..Default::default()
        }
    }

    fn blur(mut self, change: BlurChange) -> Self {
        self.blur = Some(change);
        self
    }

    fn overlay(mut self, title: &'static str, description: &'static str, tone: Tone) -> Self {
        self.overlay = Some(Overlay::new(title, description, tone));
        self
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

pub struct ProctorSession {
    ctx: AttemptContext,
    sink: Arc<dyn CheatLogSink>,
    hidden_at: Option<Instant>,
    drift: DriftDetector,
    watch: CancellationToken,
    watch_task: Option<JoinHandle<()>>,
    release_hooks: Vec<ReleaseHook>,
}

impl ProctorSession {
    pub fn acquire(ctx: AttemptContext, sink: Arc<dyn CheatLogSink>) -> Self {
        log::info!("Proctoring attempt {} (exam {})", ctx.attempt_id, ctx.exam_id);
        Self {
            ctx,
            sink,
            hidden_at: None,
            drift: DriftDetector::new(Instant::now()),
            watch: CancellationToken::new(),
            watch_task: None,
            release_hooks: Vec::new(),
        }
    }

    /// Registers cleanup to run when the session ends, e.g. restoring text
    /// selection on the host page.
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release_hooks.push(Box::new(hook));
        self
    }

    pub fn context(&self) -> &AttemptContext {
        &self.ctx
    }

    pub fn on_visibility_change(&mut self, hidden: bool, now: Instant) -> Reaction {
        if hidden {
            self.hidden_at = Some(now);
            self.emit(CheatSignal::TabSwitch, None);
            self.emit(CheatSignal::VisibilityHidden, None);
            return Reaction::default().blur(BlurChange::On).overlay(
                "Warning",
                "Left the app or minimized it. Monitoring recorded.",
                Tone::Warn,
            );
        }

        if let Some(hidden_at) = self.hidden_at.take() {
            let hidden_ms = now.saturating_duration_since(hidden_at).as_millis() as u64;
            self.emit(classify_hidden(hidden_ms), Some(json!({ "hidden_ms": hidden_ms })));
        }
        self.emit(CheatSignal::WindowFocus, None);
        Reaction::default().blur(BlurChange::Off)
    }

    pub fn on_blur(&mut self) -> Reaction {
        self.emit(CheatSignal::WindowBlur, None);
        Reaction::default()
            .blur(BlurChange::On)
            .overlay("Warning", "Focus lost. Monitoring recorded.", Tone::Warn)
    }

    pub fn on_focus(&mut self) -> Reaction {
        self.emit(CheatSignal::WindowFocus, None);
        Reaction::default().blur(BlurChange::Off)
    }

    pub fn on_context_menu(&mut self) -> Reaction {
        self.emit(CheatSignal::ContextMenu, None);
        Reaction::suppressed().overlay("Blocked", "Right-click blocked (logged).", Tone::Warn)
    }

    pub fn on_copy(&mut self) -> Reaction {
        self.emit(CheatSignal::Copy, None);
        Reaction::suppressed().overlay("Blocked", "Copy attempt logged.", Tone::Warn)
    }

    pub fn on_paste(&mut self) -> Reaction {
        self.emit(CheatSignal::Paste, None);
        Reaction::suppressed().overlay("Warning", "Paste attempt logged.", Tone::Warn)
    }

    pub fn on_select_start(&mut self) -> Reaction {
        self.emit(CheatSignal::TextSelection, None);
        Reaction::suppressed()
    }

    pub fn on_key_down(&mut self, press: &KeyPress) -> Reaction {
        let Some(signal) = classify_key(press) else {
            return Reaction::default();
        };
        let ctrl = press.ctrl || press.meta;
        match signal {
            CheatSignal::ScreenshotKey => {
                self.emit(signal, Some(json!({ "key": "PrintScreen" })));
                Reaction::suppressed()
                    .blur(BlurChange::Pulse(SCREENSHOT_BLUR))
                    .overlay("Warning", "Screenshot attempt detected (logged).", Tone::Danger)
            }
            CheatSignal::DevtoolsShortcut => {
                self.emit(signal, Some(json!({ "key": press.key, "ctrl": ctrl, "shift": press.shift })));
                Reaction::suppressed().overlay("Blocked", "DevTools shortcut blocked (logged).", Tone::Danger)
            }
            _ => {
                self.emit(signal, Some(json!({ "key": press.key, "ctrl": ctrl, "shift": press.shift })));
                Reaction::suppressed().overlay("Blocked", "Shortcut blocked (logged).", Tone::Warn)
            }
        }
    }

    /// Drives the drift detector by hand. Use either this or
    /// [`spawn_drift_watch`](Self::spawn_drift_watch), not both.
    pub fn on_tick(&mut self, now: Instant) -> Reaction {
        if let Some(diff_ms) = self.drift.tick(now) {
            self.emit(CheatSignal::DebuggerPauseSuspect, Some(json!({ "diff_ms": diff_ms })));
        }
        Reaction::default()
    }

    /// Starts the periodic drift tick on the current runtime. Returns `false`
    /// if it is already running or no runtime is available.
    pub fn spawn_drift_watch(&mut self) -> bool {
        if self.watch_task.is_some() {
            return false;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("No async runtime; drift watch not started.");
                return false;
            }
        };

        let token = self.watch.clone();
        let ctx = self.ctx.clone();
        let sink = Arc::clone(&self.sink);
        self.watch_task = Some(handle.spawn(async move {
            let start = tokio::time::Instant::now() + DRIFT_PERIOD;
            let mut interval = tokio::time::interval_at(start, DRIFT_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut detector = DriftDetector::new(Instant::now());
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Some(diff_ms) = detector.tick(Instant::now()) {
                            log::debug!("Tick drifted by {} ms", diff_ms);
                            sink.submit(ctx.entry(
                                CheatSignal::DebuggerPauseSuspect,
                                Some(json!({ "diff_ms": diff_ms })),
                            ));
                        }
                    }
                }
            }
            log::debug!("Drift watch for attempt {} stopped.", ctx.attempt_id);
        }));
        true
    }

    /// Ends the session. Equivalent to dropping it.
    pub fn release(self) {}

    fn emit(&self, signal: CheatSignal, detail: Option<Value>) {
        log::debug!("Attempt {}: {}", self.ctx.attempt_id, signal);
        self.sink.submit(self.ctx.entry(signal, detail));
    }
}

impl Drop for ProctorSession {
    fn drop(&mut self) {
        self.watch.cancel();
        for hook in self.release_hooks.drain(..) {
            hook();
        }
        log::info!("Proctoring for attempt {} released.", self.ctx.attempt_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<CheatLogEntry>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<String> {
            self.entries.lock().unwrap().iter().map(|e| e.event.clone()).collect()
        }

        fn last(&self) -> CheatLogEntry {
            self.entries.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl CheatLogSink for RecordingSink {
        fn submit(&self, entry: CheatLogEntry) {
            self.entries.lock().unwrap().push(entry);
        }
    }

    fn session(exam_id: i64) -> (ProctorSession, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let session = ProctorSession::acquire(AttemptContext::new(31, exam_id), sink.clone());
        (session, sink)
    }

    #[test]
    fn short_absence_is_a_screenshot_suspect() {
        let (mut session, sink) = session(7);
        let t0 = Instant::now();

        let hidden = session.on_visibility_change(true, t0);
        assert_eq!(hidden.blur, Some(BlurChange::On));
        assert_eq!(hidden.overlay.as_ref().map(|o| o.tone), Some(Tone::Warn));
        assert!(!hidden.suppress);

        let back = session.on_visibility_change(false, t0 + Duration::from_millis(2500));
        assert_eq!(back.blur, Some(BlurChange::Off));
        assert_eq!(
            sink.events(),
            vec!["TAB_SWITCH", "VISIBILITY_HIDDEN", "SCREENSHOT_SUSPECT", "WINDOW_FOCUS"]
        );
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries[2].detail, Some(json!({ "hidden_ms": 2500 })));
        assert_eq!(entries[2].exam_id, Some(7));
    }

    #[test]
    fn long_absence_is_a_screen_record_suspect() {
        let (mut session, sink) = session(7);
        let t0 = Instant::now();
        session.on_visibility_change(true, t0);
        session.on_visibility_change(false, t0 + Duration::from_millis(2501));
        assert_eq!(sink.events()[2], "SCREEN_RECORD_SUSPECT");
    }

    #[test]
    fn becoming_visible_without_hiding_only_reports_focus() {
        let (mut session, sink) = session(7);
        session.on_visibility_change(false, Instant::now());
        assert_eq!(sink.events(), vec!["WINDOW_FOCUS"]);
    }

    #[test]
    fn clipboard_and_menu_events_are_suppressed() {
        let (mut session, sink) = session(0);
        assert!(session.on_context_menu().suppress);
        assert!(session.on_copy().suppress);
        assert!(session.on_paste().suppress);
        let select = session.on_select_start();
        assert!(select.suppress);
        assert_eq!(select.overlay, None);

        assert_eq!(sink.events(), vec!["CONTEXT_MENU", "COPY", "PASTE", "TEXT_SELECTION"]);
        assert_eq!(sink.last().exam_id, None);
    }

    #[test]
    fn blur_and_focus_toggle_the_page_blur() {
        let (mut session, sink) = session(7);
        assert_eq!(session.on_blur().blur, Some(BlurChange::On));
        assert_eq!(session.on_focus().blur, Some(BlurChange::Off));
        assert_eq!(sink.events(), vec!["WINDOW_BLUR", "WINDOW_FOCUS"]);
    }

    #[test]
    fn print_screen_pulses_blur_with_danger_overlay() {
        let (mut session, sink) = session(7);
        let reaction = session.on_key_down(&KeyPress::new("PrintScreen"));
        assert!(reaction.suppress);
        assert_eq!(reaction.blur, Some(BlurChange::Pulse(SCREENSHOT_BLUR)));
        let overlay = reaction.overlay.unwrap();
        assert_eq!(overlay.tone, Tone::Danger);
        assert_eq!(overlay.lifetime, OVERLAY_LIFETIME);
        assert_eq!(sink.last().detail, Some(json!({ "key": "PrintScreen" })));
    }

    #[test]
    fn shortcuts_log_key_and_modifiers() {
        let (mut session, sink) = session(7);
        let reaction = session.on_key_down(&KeyPress::new("P").meta());
        assert!(reaction.suppress);
        assert_eq!(reaction.overlay.unwrap().tone, Tone::Warn);
        let entry = sink.last();
        assert_eq!(entry.event, "SHORTCUT_BLOCK");
        assert_eq!(entry.detail, Some(json!({ "key": "P", "ctrl": true, "shift": false })));

        let devtools = session.on_key_down(&KeyPress::new("I").ctrl().shift());
        assert_eq!(devtools.overlay.unwrap().tone, Tone::Danger);
        assert_eq!(sink.last().event, "DEVTOOLS_SHORTCUT");

        let plain = session.on_key_down(&KeyPress::new("a"));
        assert_eq!(plain, Reaction::default());
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn manual_ticks_report_stalls() {
        let (mut session, sink) = session(7);
        let t0 = Instant::now();
        session.on_tick(t0 + Duration::from_millis(1000));
        session.on_tick(t0 + Duration::from_millis(4000));
        assert_eq!(sink.events(), vec!["DEBUGGER_PAUSE_SUSPECT"]);
        let diff = sink.last().detail.unwrap()["diff_ms"].as_u64().unwrap();
        assert!(diff >= 3000);
    }

    #[test]
    fn release_hooks_run_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(RecordingSink::default());
        let c = Arc::clone(&count);
        let session = ProctorSession::acquire(AttemptContext::new(1, 1), sink)
            .on_release(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        session.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = Arc::clone(&count);
        let early_exit = || -> Result<(), String> {
            let _session = ProctorSession::acquire(AttemptContext::new(2, 1), Arc::new(RecordingSink::default()))
                .on_release(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            Err("attempt aborted".into())
        };
        assert!(early_exit().is_err());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn watermark_uses_the_attempt_context() {
        let ctx = AttemptContext::new(9, 3).with_telegram_id(Some(555));
        assert_eq!(ctx.watermark("T"), "Examly • tid:555 • attempt:9 • T");
    }

    #[tokio::test]
    async fn drift_watch_stops_on_release() {
        let (mut session, _sink) = session(7);
        assert!(session.spawn_drift_watch());
        assert!(!session.spawn_drift_watch());

        let task = session.watch_task.take().unwrap();
        session.release();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("drift watch did not stop")
            .unwrap();
    }

    #[test]
    fn drift_watch_needs_a_runtime() {
        let (mut session, _sink) = session(7);
        assert!(!session.spawn_drift_watch());
    }
}
