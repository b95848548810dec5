//! Render health checks and the Normal → Safe → Hard Fallback cascade.
//!
//! After every draw the target reports what it actually produced. If the frame is not
//! visibly usable the watchdog redraws with a simpler strategy and checks again. Hard
//! Fallback is the end of the line for a cycle and is not checked.

use crate::view::ExplorerView;
use std::fmt;
use tracing::{debug, warn};

/// Frames with less visible text than this are treated as blank.
pub const MIN_TEXT_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Normal,
    Safe,
    HardFallback,
}

impl RenderMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Safe => "safe",
            Self::HardFallback => "hard_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleSummary {
    pub display: String,
    pub visibility: String,
    pub opacity: f32,
}

impl StyleSummary {
    pub fn visible() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: 1.0,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.display.eq_ignore_ascii_case("none")
            || self.visibility.eq_ignore_ascii_case("hidden")
            || self.opacity <= 0.0
    }
}

impl fmt::Display for StyleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "display={};visibility={};opacity={}",
            self.display, self.visibility, self.opacity
        )
    }
}

/// What a draw produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub output_len: usize,
    pub has_container: bool,
    pub has_header: bool,
    pub width: u32,
    pub height: u32,
    /// Entity rows (table rows or list items) actually drawn.
    pub row_count: usize,
    pub text_length: usize,
    /// `None` when the container's style could not be read.
    pub style: Option<StyleSummary>,
}

impl RenderSnapshot {
    pub fn rect(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokenReason {
    EmptyOutput,
    MissingContainer,
    MissingHeader,
    HiddenStyle,
    ZeroArea,
    TooLittleText,
    NoRowsRendered,
}

impl BrokenReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::EmptyOutput => "empty_output",
            Self::MissingContainer => "missing_container",
            Self::MissingHeader => "missing_header",
            Self::HiddenStyle => "hidden_style",
            Self::ZeroArea => "zero_area",
            Self::TooLittleText => "too_little_text",
            Self::NoRowsRendered => "no_rows_rendered",
        }
    }
}

/// The first reason the frame is unusable, or `None` when it is healthy.
pub fn assess(snapshot: &RenderSnapshot, filtered_count: usize) -> Option<BrokenReason> {
    if snapshot.output_len == 0 {
        return Some(BrokenReason::EmptyOutput);
    }
    if !snapshot.has_container {
        return Some(BrokenReason::MissingContainer);
    }
    if !snapshot.has_header {
        return Some(BrokenReason::MissingHeader);
    }
    if snapshot.style.as_ref().is_none_or(StyleSummary::is_hidden) {
        return Some(BrokenReason::HiddenStyle);
    }
    if snapshot.width == 0 || snapshot.height == 0 {
        return Some(BrokenReason::ZeroArea);
    }
    if snapshot.text_length < MIN_TEXT_LENGTH {
        return Some(BrokenReason::TooLittleText);
    }
    if filtered_count > 0 && snapshot.row_count == 0 {
        return Some(BrokenReason::NoRowsRendered);
    }
    None
}

/// Why the hard fallback was needed, drawn inline with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub reason: BrokenReason,
    pub snapshot: RenderSnapshot,
}

pub trait RenderTarget {
    fn draw(&mut self, mode: RenderMode, view: &ExplorerView, diagnostics: Option<&Diagnostics>);

    /// Inspects whatever the last `draw` produced.
    fn inspect(&self) -> RenderSnapshot;
}

#[derive(Debug, Default)]
pub struct Watchdog {
    safe_mode: bool,
    last_snapshot: Option<RenderSnapshot>,
    last_reason: Option<BrokenReason>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode
    }

    pub fn last_snapshot(&self) -> Option<&RenderSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn last_reason(&self) -> Option<BrokenReason> {
        self.last_reason
    }

    /// Forget the sticky safe mode; called when the session is reopened.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// One render cycle: draw, verify, escalate. Returns the mode left on screen.
    pub fn run(&mut self, target: &mut dyn RenderTarget, view: &ExplorerView) -> RenderMode {
        let mut mode = if self.safe_mode {
            RenderMode::Safe
        } else {
            RenderMode::Normal
        };

        loop {
            target.draw(mode, view, None);
            let snapshot = target.inspect();
            debug!(
                "{} render: len={} rows={} text={} rect={}",
                mode.label(),
                snapshot.output_len,
                snapshot.row_count,
                snapshot.text_length,
                snapshot.rect()
            );

            if view.suppresses_health_checks() {
                self.last_snapshot = Some(snapshot);
                return mode;
            }

            let Some(reason) = assess(&snapshot, view.filtered_count) else {
                self.last_snapshot = Some(snapshot);
                return mode;
            };

            self.last_reason = Some(reason);
            match mode {
                RenderMode::Normal => {
                    warn!("render unhealthy ({}); switching to safe mode", reason.label());
                    self.safe_mode = true;
                    mode = RenderMode::Safe;
                    self.last_snapshot = Some(snapshot);
                }
                RenderMode::Safe | RenderMode::HardFallback => {
                    warn!("safe render unhealthy ({}); hard fallback", reason.label());
                    let diagnostics = Diagnostics { reason, snapshot };
                    target.draw(RenderMode::HardFallback, view, Some(&diagnostics));
                    self.last_snapshot = Some(diagnostics.snapshot);
                    return RenderMode::HardFallback;
                }
            }
        }
    }
}
