//! The particle tree: everything the bar can draw.
//!
//! A [`Particle`] is a long-lived description: shared attributes (margins,
//! font, foreground, decoration, per-button on-click templates, shaping
//! policy) plus one of a closed set of variants. Instantiating a particle
//! against a [`TagSet`](core_tag::TagSet) produces an [`Exposable`]: the
//! per-frame object that owns its expanded text and click commands, caches
//! its width during layout, and answers pointer dispatch.
//!
//! Particles form a single-ownership tree (parents own children, the
//! enclosing module owns the root); exposables form a parallel tree per
//! render. Instantiation takes `&self`, so concurrent instantiations of
//! one particle are legal; the only shared mutable state, the string
//! particle's shaped-run cache, sits behind its own lock.

use std::sync::Arc;

use core_config::{ConfigNode, Inherit, Keychain, VerifyResult};
use core_events::MouseButton;
use core_font::{FontHandle, Shaping};
use core_render::Color;
use core_tag::TagSet;

mod deco;
mod empty;
mod exposable;
mod list;
pub mod map;
mod progress;
mod ramp;
mod string;

mod conf;

pub use conf::{conf_to_particle, verify_particle};
pub use deco::Decoration;
pub use exposable::{dynlist_exposable, Exposable};

/// Cursor shown over inert surface area.
pub const CURSOR_DEFAULT: &str = "left_ptr";
/// Cursor shown over clickable content.
pub const CURSOR_POINTER: &str = "hand2";

/// What exposables need from the bar while handling pointer events.
///
/// `set_cursor` requests a pointer image change; `execute` hands a fully
/// expanded on-click command line to the shell. Both are fire-and-forget
/// from the particle's point of view.
pub trait BarApi {
    fn set_cursor(&self, name: &str);
    fn execute(&self, command: &str);
}

/// Per-button on-click command templates.
#[derive(Debug, Clone, Default)]
pub struct ClickTemplates {
    slots: [Option<String>; MouseButton::COUNT],
}

impl ClickTemplates {
    pub fn set(&mut self, button: MouseButton, template: impl Into<String>) {
        if let Some(idx) = button.index() {
            self.slots[idx] = Some(template.into());
        }
    }

    pub fn get(&self, button: MouseButton) -> Option<&str> {
        self.slots[button.index()?].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Expand every template against `tags`.
    pub fn expand(&self, tags: &TagSet) -> ClickTemplates {
        let mut out = ClickTemplates::default();
        for (idx, slot) in self.slots.iter().enumerate() {
            out.slots[idx] = slot
                .as_deref()
                .map(|t| core_tag::expand_template(t, tags));
        }
        out
    }
}

/// A renderable unit. See the crate docs for the ownership story.
pub struct Particle {
    pub(crate) left_margin: i32,
    pub(crate) right_margin: i32,
    pub(crate) foreground: Color,
    pub(crate) font: FontHandle,
    pub(crate) shaping: Shaping,
    pub(crate) deco: Option<Arc<Decoration>>,
    pub(crate) on_click: ClickTemplates,
    pub(crate) kind: Kind,
}

pub(crate) enum Kind {
    Text(string::TextParticle),
    Empty,
    List(list::ListParticle),
    Map(map::MapParticle),
    Ramp(ramp::RampParticle),
    Progress(progress::ProgressParticle),
}

/// Shared attributes, resolved against the inherit chain before the
/// variant is built.
pub(crate) struct Common {
    pub left_margin: i32,
    pub right_margin: i32,
    pub foreground: Color,
    pub font: FontHandle,
    pub shaping: Shaping,
    pub deco: Option<Arc<Decoration>>,
    pub on_click: ClickTemplates,
}

impl Particle {
    pub(crate) fn assemble(common: Common, kind: Kind) -> Self {
        Self {
            left_margin: common.left_margin,
            right_margin: common.right_margin,
            foreground: common.foreground,
            font: common.font,
            shaping: common.shaping,
            deco: common.deco,
            on_click: common.on_click,
            kind,
        }
    }

    /// Build a text particle with default attributes; the programmatic
    /// entry point modules use for simple labels.
    pub fn text(template: impl Into<String>, font: FontHandle, foreground: Color) -> Self {
        Self::assemble(
            Common {
                left_margin: 0,
                right_margin: 0,
                foreground,
                font,
                shaping: Shaping::default(),
                deco: None,
                on_click: ClickTemplates::default(),
            },
            Kind::Text(string::TextParticle::new(template, 0)),
        )
    }

    /// Instantiate against a tag snapshot. The result is independent of
    /// `self` except for the string particle's shared run cache.
    pub fn instantiate(&self, tags: &TagSet) -> Exposable {
        let content = match &self.kind {
            Kind::Text(p) => p.instantiate(self, tags),
            Kind::Empty => exposable::Content::Empty,
            Kind::List(p) => p.instantiate(tags),
            Kind::Map(p) => p.instantiate(tags),
            Kind::Ramp(p) => p.instantiate(tags),
            Kind::Progress(p) => p.instantiate(tags),
        };

        Exposable::new(self, content, self.on_click.expand(tags))
    }
}

/// Plugin entry points for one particle variant. Construction goes through
/// [`conf_to_particle`], which resolves the shared attributes before
/// dispatching here.
pub struct ParticleIface {
    pub name: &'static str,
    pub(crate) verify_conf: fn(&mut Keychain, &ConfigNode) -> VerifyResult,
    pub(crate) from_conf: fn(&ConfigNode, &Inherit) -> anyhow::Result<Kind>,
}

/// Plugin entry points for one decoration variant.
pub struct DecoIface {
    pub name: &'static str,
    pub(crate) verify_conf: fn(&mut Keychain, &ConfigNode) -> VerifyResult,
    pub(crate) from_conf: fn(&ConfigNode) -> anyhow::Result<Decoration>,
}

/// Look up a particle plugin by its configuration name.
pub fn particle_iface(name: &str) -> Option<&'static ParticleIface> {
    conf::PARTICLES.iter().find(|p| p.name == name)
}

/// Look up a decoration plugin by its configuration name.
pub fn deco_iface(name: &str) -> Option<&'static DecoIface> {
    deco::DECORATIONS.iter().find(|d| d.name == name)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::Mutex;

    /// Records cursor changes and executed commands.
    #[derive(Default)]
    pub struct RecordingBar {
        pub cursors: Mutex<Vec<String>>,
        pub commands: Mutex<Vec<String>>,
    }

    impl BarApi for RecordingBar {
        fn set_cursor(&self, name: &str) {
            self.cursors.lock().unwrap().push(name.to_owned());
        }
        fn execute(&self, command: &str) {
            self.commands.lock().unwrap().push(command.to_owned());
        }
    }

    pub fn test_inherit() -> Inherit {
        Inherit::new(
            Arc::new(core_font::FixedFontProvider::default()),
            core_font::FixedFont::standard(),
        )
    }
}
