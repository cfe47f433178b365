//! # Four-Digit Display Cycling
//!
//! A TM1637-style display has four seven-segment digits with decimal points, so
//! the spool is shown as three alternating views:
//!
//! | View   | Example  | Meaning                       |
//! |--------|----------|-------------------------------|
//! | type   | `PLA `   | material, upper case          |
//! | grams  | `950.G`  | grams remaining, 0-999        |
//! | metres | `815.L`  | metres remaining, 0-999       |
//!
//! Views advance on a fixed interval. A frame is only pushed when the view or
//! one of the remaining quantities changed, which keeps the serial bus quiet.

use crate::spool::Document;
use crate::Uid;

/// Text shown when no spool is tracked.
pub const BLANK_TEXT: &str = "----";

/// Digits on the display.
pub const DISPLAY_WIDTH: usize = 4;

/// Highest brightness level the display accepts.
pub const MAX_BRIGHTNESS: u8 = 7;

/// A four-character segment display. Writes are fire-and-forget.
pub trait SegmentDisplay {
    /// Show up to four characters; a `.` lights the previous digit's point.
    fn show(&mut self, text: &str);
    fn set_brightness(&mut self, level: u8);
}

/// The views, in cycling order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    Type,
    GramsRemaining,
    MetersRemaining,
}

const MODES: [DisplayMode; 3] = [
    DisplayMode::Type,
    DisplayMode::GramsRemaining,
    DisplayMode::MetersRemaining,
];

/// Something to put on the display.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Blank,
    Text(String),
    Quantity { value: f64, unit: char },
}

impl Frame {
    /// Display text for this frame.
    pub fn text(&self) -> String {
        match self {
            Frame::Blank => BLANK_TEXT.to_string(),
            Frame::Text(text) => fit_text(text),
            Frame::Quantity { value, unit } => format_quantity(*value, *unit),
        }
    }
}

/// Format a quantity as three digits, a point and a unit letter, e.g. `042.G`.
///
/// Values are rounded and clamped to 0..=999.
pub fn format_quantity(value: f64, unit: char) -> String {
    let whole = if value.is_finite() {
        value.round().clamp(0.0, 999.0) as u16
    } else {
        0
    };
    format!("{:03}.{}", whole, unit)
}

/// Upper-case and pad or cut `text` to the display width.
fn fit_text(text: &str) -> String {
    let mut out: String = text.to_uppercase().chars().take(DISPLAY_WIDTH).collect();
    while out.chars().count() < DISPLAY_WIDTH {
        out.push(' ');
    }
    out
}

/// Cycles spool views and suppresses unchanged frames.
#[derive(Debug)]
pub struct DisplayCycler {
    interval_ms: u64,
    mode_index: usize,
    next_tick_ms: u64,
    current_uid: Option<Uid>,
    last_rendered: Option<(DisplayMode, f64, f64)>,
}

impl DisplayCycler {
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            interval_ms,
            mode_index: 0,
            next_tick_ms: now_ms + interval_ms,
            current_uid: None,
            last_rendered: None,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        MODES[self.mode_index]
    }

    /// Work out what the display should show at `now_ms`.
    ///
    /// Returns `None` when the display already shows the right thing.
    pub fn update(&mut self, active: Option<(&Uid, &Document)>, now_ms: u64) -> Option<Frame> {
        let Some((uid, doc)) = active else {
            if self.current_uid.is_some() {
                self.reset(now_ms);
                return Some(Frame::Blank);
            }
            return None;
        };

        if self.current_uid.as_ref() != Some(uid) {
            self.current_uid = Some(uid.clone());
            self.mode_index = 0;
            self.next_tick_ms = now_ms + self.interval_ms;
            self.last_rendered = None;
        } else if now_ms >= self.next_tick_ms {
            self.mode_index = (self.mode_index + 1) % MODES.len();
            self.next_tick_ms = now_ms + self.interval_ms;
        }

        let mode = self.mode();
        let key = (mode, doc.grams_remaining, doc.meters_remaining);
        if self.last_rendered == Some(key) {
            return None;
        }
        self.last_rendered = Some(key);

        Some(match mode {
            DisplayMode::Type => match doc.material_type.as_deref() {
                Some(material) if !material.trim().is_empty() => Frame::Text(material.to_string()),
                _ => Frame::Blank,
            },
            DisplayMode::GramsRemaining => Frame::Quantity {
                value: doc.grams_remaining,
                unit: 'G',
            },
            DisplayMode::MetersRemaining => Frame::Quantity {
                value: doc.meters_remaining,
                unit: 'L',
            },
        })
    }

    fn reset(&mut self, now_ms: u64) {
        self.current_uid = None;
        self.last_rendered = None;
        self.mode_index = 0;
        self.next_tick_ms = now_ms + self.interval_ms;
    }
}

/// Prints frames to stdout; used when no display hardware is attached.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    brightness: u8,
    shown: Option<String>,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self {
            brightness: MAX_BRIGHTNESS,
            shown: None,
        }
    }

    /// Last text pushed to the display.
    pub fn shown(&self) -> Option<&str> {
        self.shown.as_deref()
    }
}

impl SegmentDisplay for ConsoleDisplay {
    fn show(&mut self, text: &str) {
        println!("[ {:<5} ]  (brightness {})", text, self.brightness);
        self.shown = Some(text.to_string());
    }

    fn set_brightness(&mut self, level: u8) {
        self.brightness = level.min(MAX_BRIGHTNESS);
    }
}
