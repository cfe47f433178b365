//! # Polling Loop
//!
//! One call to [`Monitor::poll`] is one iteration of the device loop: scan for
//! a tag, feed the result to the tracker, then refresh the display. The caller
//! owns the clock and the sleep between iterations, which keeps the loop
//! deterministic under test.

use crate::config::Config;
use crate::display::{DisplayCycler, SegmentDisplay, BLANK_TEXT};
use crate::tag_store::TagReader;
use crate::tracker::{ConsumptionTracker, TrackerEvent};
use std::time::Duration;
use tracing::trace;

pub struct Monitor {
    tracker: ConsumptionTracker,
    cycler: DisplayCycler,
    scan_timeout: Duration,
    brightness: u8,
}

impl Monitor {
    pub fn new(config: &Config, now_ms: u64) -> Self {
        Self {
            tracker: ConsumptionTracker::new(config),
            cycler: DisplayCycler::new(config.display.interval_ms, now_ms),
            scan_timeout: Duration::from_millis(config.tracker.scan_timeout_ms),
            brightness: config.display.brightness,
        }
    }

    /// Set the configured brightness and show dashes until a spool is loaded.
    pub fn init_display<D: SegmentDisplay + ?Sized>(&self, display: &mut D) {
        display.set_brightness(self.brightness);
        display.show(BLANK_TEXT);
    }

    pub fn tracker(&self) -> &ConsumptionTracker {
        &self.tracker
    }

    /// Run one loop iteration at `now_ms`.
    pub fn poll<R, D>(&mut self, reader: &mut R, display: &mut D, now_ms: u64) -> TrackerEvent
    where
        R: TagReader + ?Sized,
        D: SegmentDisplay + ?Sized,
    {
        let seen = reader.scan_for_tag(self.scan_timeout);
        let event = self.tracker.step(reader, seen.as_ref(), now_ms);

        let active = self
            .tracker
            .active()
            .map(|tracking| (&tracking.uid, &tracking.spool.document));
        if let Some(frame) = self.cycler.update(active, now_ms) {
            let text = frame.text();
            trace!(%text, "display update");
            display.show(&text);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::ConsoleDisplay;
    use crate::tag_image::TagImage;

    #[derive(Default)]
    struct RecordingDisplay {
        frames: Vec<String>,
        brightness: Option<u8>,
    }

    impl SegmentDisplay for RecordingDisplay {
        fn show(&mut self, text: &str) {
            self.frames.push(text.to_string());
        }

        fn set_brightness(&mut self, level: u8) {
            self.brightness = Some(level);
        }
    }

    #[test]
    fn test_init_display_applies_config() {
        let mut config = Config::default();
        config.display.brightness = 3;
        let mut monitor = Monitor::new(&config, 0);
        let mut display = RecordingDisplay::default();

        monitor.init_display(&mut display);
        assert_eq!(display.brightness, Some(3));
        assert_eq!(display.frames, vec!["----"]);

        // First spool replaces the dashes
        let mut tag = TagImage::blank_with_seed(2);
        let payload = crate::TagPayload {
            material_type: Some("ABS".to_string()),
            min_diameter: Some(52.0),
            max_diameter: Some(200.0),
            width: Some(67.0),
            grams_remaining: Some(500.0),
            meters_remaining: Some(200.0),
            ..crate::TagPayload::default()
        };
        crate::write_document(&mut tag, &payload, crate::START_PAGE).unwrap();
        monitor.poll(&mut tag, &mut display, 0);
        assert_eq!(display.frames, vec!["----", "ABS "]);
    }

    #[test]
    fn test_blank_tag_leaves_display_untouched() {
        let mut tag = TagImage::blank_with_seed(1);
        let mut display = ConsoleDisplay::new();
        let mut monitor = Monitor::new(&Config::default(), 0);

        assert!(matches!(
            monitor.poll(&mut tag, &mut display, 0),
            TrackerEvent::Rejected { .. }
        ));
        assert_eq!(display.shown(), None);
        assert!(monitor.tracker().active().is_none());
    }
}
