//! The module contract and the built-in module set.
//!
//! A module is a long-running producer: `run` executes on its own worker
//! thread until the shared abort signal is readable, and `content`
//! produces a fresh exposable from a snapshot of the module's state. A
//! module that carries mutable state guards it with its own mutex; `run`
//! locks to mutate, `content` locks to snapshot, and nothing else ever
//! reaches in. Ordering between a module's writes and the next render's
//! reads comes from that mutex, nothing more.
//!
//! `run` must return 0 on clean shutdown (abort observed) and non-zero on
//! error; a failing module takes nothing else down: the bar logs the exit
//! code, keeps rendering the other modules, and reports the code when the
//! process eventually exits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use core_config::{ConfigNode, Inherit, Keychain, VerifyResult};
use core_events::AbortSignal;
use core_particle::Exposable;
use core_tag::Refresher;

mod clock;
mod label;

/// What modules can ask of the bar.
pub trait BarHandle: Send + Sync {
    /// Request the next render. Any number of pending requests collapse
    /// into one frame.
    fn refresh(&self);
    /// Request a render after `delay`.
    fn refresh_in(&self, delay: Duration);
    /// Request a pointer-image change, applied from the bar thread.
    fn set_cursor(&self, name: &str);
}

/// Adapter so realtime tags can schedule refreshes through a bar handle.
pub struct HandleRefresher(pub Arc<dyn BarHandle>);

impl Refresher for HandleRefresher {
    fn refresh_in(&self, delay: Duration) {
        self.0.refresh_in(delay);
    }
}

/// Everything a worker thread gets at start.
#[derive(Clone)]
pub struct ModuleContext {
    pub abort: AbortSignal,
    pub bar: Arc<dyn BarHandle>,
}

/// A producer of bar content. See the crate docs for the contract.
pub trait Module: Send + Sync {
    /// Stable identifier used in logs and thread names.
    fn name(&self) -> &'static str;

    /// The worker loop. Blocks until `ctx.abort` is readable; returns the
    /// module's exit code.
    fn run(&self, ctx: &ModuleContext) -> i32;

    /// Produce a fresh exposable from the current state snapshot. Called
    /// from the bar thread only; must not block on I/O.
    fn content(&self) -> Exposable;
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Plugin entry points for one module, dispatched by configuration name.
pub struct ModuleIface {
    pub name: &'static str,
    pub verify_conf: fn(&mut Keychain, &ConfigNode) -> VerifyResult,
    pub from_conf: fn(&ConfigNode, &Inherit) -> anyhow::Result<Box<dyn Module>>,
}

static MODULES: &[ModuleIface] = &[
    ModuleIface {
        name: "label",
        verify_conf: label::verify_conf,
        from_conf: label::from_conf,
    },
    ModuleIface {
        name: "clock",
        verify_conf: clock::verify_conf,
        from_conf: clock::from_conf,
    },
];

/// Look up a module plugin by its configuration name.
pub fn module_iface(name: &str) -> Option<&'static ModuleIface> {
    MODULES.iter().find(|m| m.name == name)
}
