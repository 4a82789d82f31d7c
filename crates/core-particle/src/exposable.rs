//! Per-frame particle instances.
//!
//! An exposable owns everything it needs to draw and dispatch (expanded
//! text, expanded per-button commands, its children) and stays valid
//! after the particle tree moves on. The lifecycle is strict:
//! `begin_expose` computes and caches the width, `expose` draws, and the
//! exposable is dropped when the next render replaces it. Hit testing
//! repeats the layout walk, so both must agree on the same arithmetic.

use std::sync::Arc;

use core_events::{MouseButton, MouseEvent};
use core_render::Surface;
use core_tag::{Tag, TagSet};

use crate::string::TextContent;
use crate::{BarApi, ClickTemplates, Decoration, Particle, CURSOR_DEFAULT, CURSOR_POINTER};

pub struct Exposable {
    width: i32,
    left_margin: i32,
    right_margin: i32,
    deco: Option<Arc<Decoration>>,
    on_click: ClickTemplates,
    has_template: bool,
    content: Content,
}

pub(crate) enum Content {
    Text(TextContent),
    Empty,
    List {
        children: Vec<Exposable>,
        left_spacing: i32,
        right_spacing: i32,
    },
    /// Map and ramp: the one selected child. `collapse_when_empty` drops
    /// the margins when the child reports zero width (map semantics).
    Wrap {
        child: Box<Exposable>,
        collapse_when_empty: bool,
    },
    Progress {
        children: Vec<Exposable>,
    },
    Dynlist {
        children: Vec<Exposable>,
        left_spacing: i32,
        right_spacing: i32,
    },
}

/// Compose runtime-produced exposables the way a list particle would, but
/// without margins, decoration or click handling of its own. Modules whose
/// content is a variable-length collection build one of these.
pub fn dynlist_exposable(
    children: Vec<Exposable>,
    left_spacing: i32,
    right_spacing: i32,
) -> Exposable {
    Exposable {
        width: 0,
        left_margin: 0,
        right_margin: 0,
        deco: None,
        on_click: ClickTemplates::default(),
        has_template: false,
        content: Content::Dynlist {
            children,
            left_spacing,
            right_spacing,
        },
    }
}

impl Exposable {
    pub(crate) fn new(particle: &Particle, content: Content, on_click: ClickTemplates) -> Self {
        Self {
            width: 0,
            left_margin: particle.left_margin,
            right_margin: particle.right_margin,
            deco: particle.deco.clone(),
            on_click,
            has_template: !particle.on_click.is_empty(),
            content,
        }
    }

    /// Width cached by the last `begin_expose`.
    pub fn width(&self) -> i32 {
        self.width
    }

    #[cfg(test)]
    pub(crate) fn content_for_tests(&self) -> &Content {
        &self.content
    }

    /// Compute (and cache) the width. Must run before `expose`.
    pub fn begin_expose(&mut self) -> i32 {
        let margins = self.left_margin + self.right_margin;

        self.width = match &mut self.content {
            Content::Text(text) => margins + text.begin_expose(),
            Content::Empty => margins,
            Content::List {
                children,
                left_spacing,
                right_spacing,
            } => {
                let inner = group_width(children, *left_spacing, *right_spacing);
                margins + inner
            }
            Content::Wrap {
                child,
                collapse_when_empty,
            } => {
                let w = child.begin_expose();
                if w == 0 && *collapse_when_empty {
                    0
                } else {
                    margins + w
                }
            }
            Content::Progress { children } => {
                let mut w = 0;
                for child in children.iter_mut() {
                    w += child.begin_expose();
                }
                margins + w
            }
            Content::Dynlist {
                children,
                left_spacing,
                right_spacing,
            } => group_width(children, *left_spacing, *right_spacing),
        };

        self.width
    }

    /// Draw at `(x, y)` with the given row height. The decoration covers
    /// the full `[x, x+width) x [y, y+height)` box before any content.
    pub fn expose(&self, surface: &mut Surface, x: i32, y: i32, height: i32) {
        if let Some(deco) = &self.deco {
            deco.expose(surface, x, y, self.width, height);
        }

        match &self.content {
            Content::Text(text) => text.expose(surface, x + self.left_margin, y, height),
            Content::Empty => {}
            Content::List {
                children,
                left_spacing,
                right_spacing,
            } => {
                expose_row(
                    surface,
                    children,
                    x + self.left_margin,
                    y,
                    height,
                    *left_spacing,
                    *right_spacing,
                );
            }
            Content::Wrap { child, .. } => {
                child.expose(surface, x + self.left_margin, y, height);
            }
            Content::Progress { children } => {
                let mut pen = x + self.left_margin;
                for child in children {
                    child.expose(surface, pen, y, height);
                    pen += child.width;
                }
            }
            Content::Dynlist {
                children,
                left_spacing,
                right_spacing,
            } => {
                expose_row(surface, children, x, y, height, *left_spacing, *right_spacing);
            }
        }
    }

    /// Pointer dispatch. `x` is relative to this exposable's left edge.
    pub fn on_mouse(&self, bar: &dyn BarApi, event: MouseEvent, button: MouseButton, x: i32, y: i32) {
        // A handler of our own always takes precedence over descent.
        let handles_event = match event {
            MouseEvent::Motion => self.has_template,
            MouseEvent::Click => self.on_click.get(button).is_some(),
        };

        match &self.content {
            Content::Text(_) | Content::Empty => self.default_mouse(bar, event, button),
            Content::List {
                children,
                left_spacing,
                right_spacing,
            } => {
                if handles_event {
                    self.default_mouse(bar, event, button);
                } else if let Some((child, rel)) = hit_child(
                    children,
                    self.left_margin,
                    *left_spacing,
                    *right_spacing,
                    x,
                ) {
                    child.on_mouse(bar, event, button, rel, y);
                } else {
                    // Between siblings, or in a margin.
                    self.default_mouse(bar, event, button);
                }
            }
            Content::Wrap { child, .. } => {
                if handles_event {
                    self.default_mouse(bar, event, button);
                } else if x >= self.left_margin && x < self.left_margin + child.width {
                    child.on_mouse(bar, event, button, x - self.left_margin, y);
                } else {
                    self.default_mouse(bar, event, button);
                }
            }
            Content::Progress { children } => {
                self.progress_mouse(children, bar, event, button, x, y);
            }
            Content::Dynlist {
                children,
                left_spacing,
                right_spacing,
            } => {
                if handles_event {
                    self.default_mouse(bar, event, button);
                } else if let Some((child, rel)) =
                    hit_child(children, 0, *left_spacing, *right_spacing, x)
                {
                    child.on_mouse(bar, event, button, rel, y);
                } else {
                    self.default_mouse(bar, event, button);
                }
            }
        }
    }

    /// The stock handler: pointer shape on motion, shell command on click.
    fn default_mouse(&self, bar: &dyn BarApi, event: MouseEvent, button: MouseButton) {
        match event {
            MouseEvent::Motion => {
                let cursor = if self.has_template {
                    CURSOR_POINTER
                } else {
                    CURSOR_DEFAULT
                };
                bar.set_cursor(cursor);
            }
            MouseEvent::Click => {
                if let Some(command) = self.on_click.get(button) {
                    bar.execute(command);
                }
            }
        }
    }

    /// Progress-bar dispatch: clicks on the inner span re-expand the
    /// templates against a `where` percentage before executing; the
    /// start/end markers dispatch as ordinary children.
    fn progress_mouse(
        &self,
        children: &[Exposable],
        bar: &dyn BarApi,
        event: MouseEvent,
        button: MouseButton,
        x: i32,
        y: i32,
    ) {
        debug_assert!(children.len() >= 3);

        let start = &children[0];
        let end = &children[children.len() - 1];
        let inner_start = self.left_margin + start.width;

        // Markers dispatch to their own child when it has a binding;
        // otherwise the bar's template applies, without any `where`
        // substitution.
        let marker_dispatch = |child: &Exposable, rel_x: i32| {
            let child_handles = match event {
                MouseEvent::Motion => child.has_template,
                MouseEvent::Click => child.on_click.get(button).is_some(),
            };
            if child_handles {
                child.on_mouse(bar, event, button, rel_x, y);
            } else {
                self.default_mouse(bar, event, button);
            }
        };

        if x < inner_start {
            if x >= self.left_margin {
                marker_dispatch(start, x - self.left_margin);
            } else {
                bar.set_cursor(CURSOR_DEFAULT);
            }
            return;
        }

        let inner_width: i32 = children[1..children.len() - 1].iter().map(|c| c.width).sum();

        if x - inner_start > inner_width {
            if x - inner_start - inner_width < end.width {
                marker_dispatch(end, x - inner_start - inner_width);
            } else {
                bar.set_cursor(CURSOR_DEFAULT);
            }
            return;
        }

        match event {
            MouseEvent::Motion => self.default_mouse(bar, event, button),
            MouseEvent::Click => {
                let percent = if inner_width > 0 {
                    (100 * (x - inner_start) / inner_width).clamp(0, 100) as i64
                } else {
                    0
                };
                let tags = TagSet::new(vec![Tag::new_int("where", percent)]);
                let expanded = self.on_click.expand(&tags);
                if let Some(command) = expanded.get(button) {
                    bar.execute(command);
                }
            }
        }
    }
}

/// Inner width of a row of children: positive widths plus one inter-sibling
/// gap of `left + right` spacing between adjacent positive children.
/// Zero-width children contribute nothing and consume no spacing.
fn group_width(children: &mut [Exposable], left_spacing: i32, right_spacing: i32) -> i32 {
    let mut width = 0;
    let mut positive = 0;
    for child in children.iter_mut() {
        let w = child.begin_expose();
        if w > 0 {
            width += w;
            positive += 1;
        }
    }
    if positive > 0 {
        width += (positive - 1) * (left_spacing + right_spacing);
    }
    width
}

/// Place a row of children starting at `x`; mirrors `group_width`.
fn expose_row(
    surface: &mut Surface,
    children: &[Exposable],
    x: i32,
    y: i32,
    height: i32,
    left_spacing: i32,
    right_spacing: i32,
) {
    let mut pen = x;
    for child in children {
        if child.width <= 0 {
            continue;
        }
        child.expose(surface, pen, y, height);
        pen += child.width + right_spacing + left_spacing;
    }
}

/// Locate the child under `x` (relative to the parent's left edge),
/// repeating the `expose_row` walk. Returns the child and the coordinate
/// relative to it.
fn hit_child<'a>(
    children: &'a [Exposable],
    left_margin: i32,
    left_spacing: i32,
    right_spacing: i32,
    x: i32,
) -> Option<(&'a Exposable, i32)> {
    let mut pen = left_margin;
    for child in children {
        if child.width <= 0 {
            continue;
        }
        if x >= pen && x < pen + child.width {
            return Some((child, x - pen));
        }
        pen += child.width + right_spacing + left_spacing;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingBar;

    fn fixed(width: i32) -> Exposable {
        // An empty particle is exactly its margins wide.
        let mut e = Exposable {
            width: 0,
            left_margin: width,
            right_margin: 0,
            deco: None,
            on_click: ClickTemplates::default(),
            has_template: false,
            content: Content::Empty,
        };
        e.begin_expose();
        e
    }

    fn clickable(width: i32, command: &str) -> Exposable {
        let mut on_click = ClickTemplates::default();
        on_click.set(MouseButton::Left, command);
        let mut e = Exposable {
            width: 0,
            left_margin: width,
            right_margin: 0,
            deco: None,
            on_click,
            has_template: true,
            content: Content::Empty,
        };
        e.begin_expose();
        e
    }

    #[test]
    fn dynlist_width_skips_zero_children() {
        let mut list = dynlist_exposable(vec![fixed(10), fixed(0), fixed(5)], 2, 3);
        // 10 + 5 plus a single (2+3) gap; the zero child is invisible.
        assert_eq!(list.begin_expose(), 20);
    }

    #[test]
    fn dynlist_of_nothing_is_zero_wide() {
        let mut list = dynlist_exposable(vec![], 2, 3);
        assert_eq!(list.begin_expose(), 0);
        let mut zeros = dynlist_exposable(vec![fixed(0), fixed(0)], 2, 3);
        assert_eq!(zeros.begin_expose(), 0);
    }

    #[test]
    fn hit_child_inverts_the_layout_walk() {
        let children = vec![fixed(10), fixed(0), fixed(5)];
        let mut parent = dynlist_exposable(children, 2, 3);
        parent.begin_expose();

        let Content::Dynlist { children, .. } = &parent.content else {
            unreachable!()
        };

        // First child spans [0, 10).
        assert!(matches!(hit_child(children, 0, 2, 3, 0), Some((_, 0))));
        assert!(matches!(hit_child(children, 0, 2, 3, 9), Some((_, 9))));
        // The gap dispatches to no child.
        assert!(hit_child(children, 0, 2, 3, 12).is_none());
        // Second positive child spans [15, 20).
        assert!(matches!(hit_child(children, 0, 2, 3, 15), Some((_, 0))));
        assert!(hit_child(children, 0, 2, 3, 20).is_none());
    }

    #[test]
    fn click_executes_template() {
        let bar = RecordingBar::default();
        let e = clickable(8, "notify-send hi");
        e.on_mouse(&bar, MouseEvent::Click, MouseButton::Left, 2, 0);
        assert_eq!(bar.commands.lock().unwrap().as_slice(), ["notify-send hi"]);
    }

    #[test]
    fn motion_sets_pointer_cursor_over_clickables() {
        let bar = RecordingBar::default();
        clickable(8, "x").on_mouse(&bar, MouseEvent::Motion, MouseButton::None, 2, 0);
        fixed(8).on_mouse(&bar, MouseEvent::Motion, MouseButton::None, 2, 0);
        assert_eq!(
            bar.cursors.lock().unwrap().as_slice(),
            [CURSOR_POINTER, CURSOR_DEFAULT]
        );
    }

    #[test]
    fn unbound_button_executes_nothing() {
        let bar = RecordingBar::default();
        let e = clickable(8, "only-left");
        e.on_mouse(&bar, MouseEvent::Click, MouseButton::Right, 2, 0);
        assert!(bar.commands.lock().unwrap().is_empty());
    }
}
