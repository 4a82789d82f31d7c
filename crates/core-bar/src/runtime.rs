//! The per-frame pipeline and its hit-test inverse.
//!
//! Layout is the same arithmetic in three places: group widths, the
//! expose walk, and the mouse walk. They must stay in lockstep: a click
//! at `x` must land on the exposable whose `[x, x+width)` the expose walk
//! painted there. Zero-width exposables are invisible to all three.

use std::cell::RefCell;
use std::sync::Arc;

use core_config::BarSettings;
use core_events::{MouseButton, MouseEvent};
use core_module::Module;
use core_particle::{BarApi, Exposable, CURSOR_DEFAULT};
use core_render::Surface;
use core_surface::EventHandler;

use crate::{lock, CommandRunner, Shared};

pub(crate) struct BarRuntime {
    settings: BarSettings,
    sides: [Side; 3],
    shared: Arc<Shared>,
    /// Name of the cursor currently applied; suppresses redundant churn.
    cursor_name: Option<String>,
    /// Surface width as of the last expose; the mouse walk re-derives the
    /// same layout from it.
    last_width: i32,
}

struct Side {
    modules: Vec<Arc<dyn Module>>,
    exposables: Vec<Option<Exposable>>,
}

impl Side {
    fn new(modules: Vec<Arc<dyn Module>>) -> Self {
        let count = modules.len();
        Self {
            modules,
            exposables: (0..count).map(|_| None).collect(),
        }
    }

    /// Group width: positive widths plus one inter-module gap of
    /// `left + right` spacing between adjacent positive entries.
    fn width(&self, left_spacing: i32, right_spacing: i32) -> i32 {
        let mut width = 0;
        let mut positive = 0;
        for exposable in self.exposables.iter().flatten() {
            if exposable.width() > 0 {
                width += exposable.width();
                positive += 1;
            }
        }
        if positive > 0 {
            width += (positive - 1) * (left_spacing + right_spacing);
        }
        width
    }
}

impl BarRuntime {
    pub(crate) fn new(
        settings: BarSettings,
        left: Vec<Arc<dyn Module>>,
        center: Vec<Arc<dyn Module>>,
        right: Vec<Arc<dyn Module>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            settings,
            sides: [Side::new(left), Side::new(center), Side::new(right)],
            shared,
            cursor_name: None,
            last_width: 0,
        }
    }

    /// Horizontal start of each group for the current surface width.
    fn group_origins(&self, surface_width: i32) -> [i32; 3] {
        let s = &self.settings;
        let border = s.border.width.max(0);
        let center_width = self.sides[1].width(s.left_spacing, s.right_spacing);
        let right_width = self.sides[2].width(s.left_spacing, s.right_spacing);

        [
            border + s.left_margin,
            surface_width / 2 - center_width / 2,
            surface_width - right_width - s.right_margin - border,
        ]
    }

    /// Track a cursor request against the cache; `Some` means "apply".
    fn cursor_change(&mut self, wanted: &str) -> Option<String> {
        if self.cursor_name.as_deref() == Some(wanted) {
            return None;
        }
        self.cursor_name = Some(wanted.to_owned());
        Some(wanted.to_owned())
    }
}

impl EventHandler for BarRuntime {
    fn expose(&mut self, surface: &mut Surface) {
        let s = &self.settings;
        let border = s.border.width.max(0);
        let width = surface.width() as i32;
        self.last_width = width;
        let height_with_border = surface.height() as i32;
        let content_height = height_with_border - 2 * border;

        // Background replaces; border and everything after composite.
        surface.fill_all(s.background);
        if border > 0 {
            surface.fill_rect(0, 0, width, border, s.border.color);
            surface.fill_rect(0, height_with_border - border, width, border, s.border.color);
            surface.fill_rect(0, 0, border, height_with_border, s.border.color);
            surface.fill_rect(width - border, 0, border, height_with_border, s.border.color);
        }

        // Fresh content for every module; the old exposable dies here,
        // releasing any cached shaped runs it pinned.
        for side in &mut self.sides {
            for (module, slot) in side.modules.iter().zip(side.exposables.iter_mut()) {
                let mut exposable = module.content();
                exposable.begin_expose();
                *slot = Some(exposable);
            }
        }

        let origins = self.group_origins(width);
        for (side, origin) in self.sides.iter().zip(origins) {
            let mut x = origin;
            for exposable in side.exposables.iter().flatten() {
                if exposable.width() <= 0 {
                    continue;
                }
                exposable.expose(surface, x, border, content_height);
                x += exposable.width() + s.right_spacing + s.left_spacing;
            }
        }
    }

    fn mouse(&mut self, event: MouseEvent, button: MouseButton, x: i32, y: i32) -> Option<String> {
        let border = self.settings.border.width.max(0);
        let height_with_border = self.settings.height_with_border() as i32;

        // Margins and border are inert.
        let in_border = y < border
            || y >= height_with_border - border
            || x < border
            || (self.last_width > 0 && x >= self.last_width - border);

        let wanted = if in_border {
            Some(CURSOR_DEFAULT.to_owned())
        } else {
            match self.dispatch(event, button, x, y) {
                // Hit: the chain decides; a click that ran a command
                // leaves the pointer image alone.
                Some(requested) => requested,
                // Miss: bare surface.
                None => Some(CURSOR_DEFAULT.to_owned()),
            }
        };

        self.cursor_change(&wanted?)
    }

    fn cursor_request(&mut self) -> Option<String> {
        let wanted = lock(&self.shared.cursor_request).take()?;
        self.cursor_change(&wanted)
    }
}

impl BarRuntime {
    /// Find the exposable under `x` and dispatch. `None` means nothing
    /// was hit; `Some(request)` means an exposable handled the event and
    /// may (or may not) have asked for a cursor.
    fn dispatch(
        &self,
        event: MouseEvent,
        button: MouseButton,
        x: i32,
        y: i32,
    ) -> Option<Option<String>> {
        let s = &self.settings;
        let origins = self.group_origins(self.last_width);

        let api = DispatchApi {
            runner: self.shared.runner.as_ref(),
            cursor: RefCell::new(None),
        };

        for (side, origin) in self.sides.iter().zip(origins) {
            let mut pen = origin;
            for exposable in side.exposables.iter().flatten() {
                let width = exposable.width();
                if width <= 0 {
                    continue;
                }
                if x >= pen && x < pen + width {
                    exposable.on_mouse(&api, event, button, x - pen, y);
                    return Some(api.cursor.into_inner());
                }
                pen += width + s.right_spacing + s.left_spacing;
            }
        }

        None
    }
}

/// Collects what a dispatch chain asks for; single-threaded by
/// construction (the bar thread owns both walks).
struct DispatchApi<'a> {
    runner: &'a dyn CommandRunner,
    cursor: RefCell<Option<String>>,
}

impl BarApi for DispatchApi<'_> {
    fn set_cursor(&self, name: &str) {
        *self.cursor.borrow_mut() = Some(name.to_owned());
    }

    fn execute(&self, command: &str) {
        self.runner.run(command);
    }
}
