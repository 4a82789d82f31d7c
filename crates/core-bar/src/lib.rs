//! The bar runtime: module orchestration, the render loop, and shutdown.
//!
//! One bar thread runs the backend's event pump and all rendering; each
//! module gets a worker thread sharing one abort signal. Invariants the
//! rest of the tree relies on:
//!
//! - At most one render is in flight; module threads never touch the
//!   surface. Everything a render reads from a module comes out of
//!   `content()`, which snapshots under the module's own lock.
//! - A `refresh()` posted before a render starts is visible to that
//!   render; posts between two renders collapse into one frame.
//! - When the loop exits (abort, compositor loss, surface closed), the
//!   bar raises abort, joins every worker, and reports the first
//!   non-zero module exit code as its own.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use core_config::BarSettings;
use core_events::AbortSignal;
use core_module::{BarHandle, Module, ModuleContext};
use core_surface::{Backend, RefreshPoster, SurfaceConfig};

mod runtime;

use runtime::BarRuntime;

/// Executes expanded on-click command lines. Swappable so tests can
/// capture commands instead of spawning shells.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str);
}

/// Hands the command line to `sh -c` and reaps the child off-thread.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) {
        tracing::debug!(target: "bar", command, "executing on-click handler");
        match std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .spawn()
        {
            Ok(mut child) => {
                thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(err) => {
                tracing::error!(target: "bar", command, error = %err, "failed to spawn handler");
            }
        }
    }
}

/// The bar-side endpoint modules talk to.
pub(crate) struct Shared {
    poster: Arc<dyn RefreshPoster>,
    abort: AbortSignal,
    runner: Arc<dyn CommandRunner>,
    /// Cursor requested by a module thread; applied from the bar thread.
    cursor_request: Mutex<Option<String>>,
}

impl BarHandle for Shared {
    fn refresh(&self) {
        self.poster.post();
    }

    fn refresh_in(&self, delay: Duration) {
        // A short-lived timer thread that aborts early with everyone else.
        let poster = Arc::clone(&self.poster);
        let abort = self.abort.clone();
        thread::spawn(move || {
            if !abort.wait_timeout(delay) {
                poster.post();
            }
        });
    }

    fn set_cursor(&self, name: &str) {
        *lock(&self.cursor_request) = Some(name.to_owned());
        // Wake the loop so the request is picked up promptly.
        self.poster.post();
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A bar instance: settings, three module groups, a backend.
pub struct Bar {
    settings: BarSettings,
    left: Vec<Arc<dyn Module>>,
    center: Vec<Arc<dyn Module>>,
    right: Vec<Arc<dyn Module>>,
    backend: Box<dyn Backend>,
    abort: AbortSignal,
    runner: Arc<dyn CommandRunner>,
}

impl Bar {
    pub fn new(
        settings: BarSettings,
        left: Vec<Box<dyn Module>>,
        center: Vec<Box<dyn Module>>,
        right: Vec<Box<dyn Module>>,
        backend: Box<dyn Backend>,
        abort: AbortSignal,
    ) -> Self {
        let arcs = |mods: Vec<Box<dyn Module>>| {
            mods.into_iter()
                .map(|m| Arc::<dyn Module>::from(m))
                .collect()
        };
        Self {
            settings,
            left: arcs(left),
            center: arcs(center),
            right: arcs(right),
            backend,
            abort,
            runner: Arc::new(ShellRunner),
        }
    }

    /// Replace the on-click executor; test hook.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Set up the backend, run the module fleet and the event loop to
    /// completion, and tear everything down.
    ///
    /// Returns the process exit code: 0, or the first non-zero module
    /// exit code observed at join time. Backend setup failure is an
    /// `Err` (the caller exits 1).
    pub fn run(mut self) -> anyhow::Result<i32> {
        let surface_config = SurfaceConfig {
            monitor: self.settings.monitor.clone(),
            location: self.settings.location,
            height_with_border: self.settings.height_with_border(),
            border: self.settings.border,
            title: "slat".to_owned(),
        };

        if let Err(err) = self.backend.setup(&surface_config) {
            self.backend.cleanup();
            return Err(err).context("backend setup failed");
        }

        if let Some(output) = self.backend.output_name() {
            tracing::info!(target: "bar", output = %output, "surface up");
        }

        let shared = Arc::new(Shared {
            poster: self.backend.refresh_poster(),
            abort: self.abort.clone(),
            runner: Arc::clone(&self.runner),
            cursor_request: Mutex::new(None),
        });

        // One worker per module, label and all; a module with nothing to
        // do still parks on the abort fd so shutdown is uniform.
        let mut workers = Vec::new();
        for module in self
            .left
            .iter()
            .chain(self.center.iter())
            .chain(self.right.iter())
        {
            let module = Arc::clone(module);
            let bar: Arc<dyn BarHandle> = shared.clone();
            let ctx = ModuleContext {
                abort: self.abort.clone(),
                bar,
            };
            let name = module.name();
            tracing::info!(target: "bar", module = name, "starting worker");
            let handle = thread::Builder::new()
                .name(format!("mod:{name}"))
                .spawn(move || {
                    let code = module.run(&ctx);
                    if code != 0 {
                        // The bar keeps rendering everyone else; the code
                        // resurfaces at shutdown as the process exit code.
                        tracing::error!(target: "bar", module = name, code, "module failed");
                    }
                    code
                })
                .context("failed to spawn module worker")?;
            workers.push((name, handle));
        }

        let mut runtime = BarRuntime::new(
            self.settings.clone(),
            self.left.clone(),
            self.center.clone(),
            self.right.clone(),
            shared,
        );

        let loop_result = self.backend.run_loop(&self.abort, &mut runtime);

        // Whatever ended the loop, take the fleet down with us.
        self.abort.raise();

        let mut exit_code = 0;
        for (name, handle) in workers {
            match handle.join() {
                Ok(code) if code != 0 => {
                    tracing::error!(target: "bar", module = name, code, "module exited with error");
                    if exit_code == 0 {
                        exit_code = code;
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::error!(target: "bar", module = name, "module worker panicked");
                    if exit_code == 0 {
                        exit_code = 1;
                    }
                }
            }
        }

        self.backend.cleanup();
        loop_result?;

        tracing::info!(target: "bar", exit_code, "bar exiting");
        Ok(exit_code)
    }
}
