//! slat entrypoint: configuration in, bar out.
//!
//! Exit codes: 0 on graceful shutdown, 1 on startup failure, a module's
//! non-zero exit code when a module failed during the run.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Once};

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use core_bar::Bar;
use core_config::{BackendKind, ConfigNode, Inherit, Keychain};
use core_events::AbortSignal;
use core_font::{FixedFontProvider, FontProvider};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "slat", version, about = "A thin status panel")]
struct Args {
    /// Configuration file (TOML rendering of the panel description).
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured display backend.
    #[arg(short, long, value_parser = parse_backend)]
    backend: Option<BackendKind>,
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    s.parse()
}

fn main() -> ExitCode {
    let _log_guard = match configure_logging() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("slat: failed to initialise logging: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    install_panic_hook();

    let args = Args::parse();

    match run(args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from((code & 0xff).max(1) as u8),
        Err(err) => {
            error!(target: "runtime", "startup failed: {err:#}");
            eprintln!("slat: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn configure_logging() -> Result<Option<WorkerGuard>> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .try_init()
    {
        Ok(()) => Ok(Some(guard)),
        // A subscriber installed by a harness wins; drop ours.
        Err(_) => Ok(None),
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn run(args: Args) -> Result<i32> {
    info!(target: "runtime", config = %args.config.display(), "startup");

    let content = std::fs::read_to_string(&args.config)
        .with_context(|| format!("cannot read {}", args.config.display()))?;
    let root: ConfigNode = toml::from_str(&content)
        .with_context(|| format!("cannot parse {}", args.config.display()))?;

    let bar_node = root
        .get("bar")
        .ok_or_else(|| anyhow!("configuration has no [bar] table"))?;

    // Everything below is rejected before any thread exists.
    let mut chain = Keychain::named("bar");
    let mut settings = core_config::bar_settings_from_node(&mut chain, bar_node)?;
    if let Some(backend) = args.backend {
        settings.backend = backend;
    }

    let fonts: Arc<dyn FontProvider> = Arc::new(FixedFontProvider::default());
    let default_font = fonts.load("default")?;
    let mut inherit = Inherit::new(fonts, default_font);
    if let Some(font) = bar_node.get("font").and_then(ConfigNode::as_str) {
        inherit.font = inherit.fonts.load(font)?;
    }
    if let Some(color) = bar_node.get("foreground").and_then(ConfigNode::as_str) {
        inherit.foreground = core_render_color(color)?;
    }

    let left = modules_for_side(bar_node, "left", &mut chain, &inherit)?;
    let center = modules_for_side(bar_node, "center", &mut chain, &inherit)?;
    let right = modules_for_side(bar_node, "right", &mut chain, &inherit)?;

    if left.is_empty() && center.is_empty() && right.is_empty() {
        return Err(anyhow!("no modules configured"));
    }

    let abort = AbortSignal::new().context("failed to create abort signal")?;
    register_signals(&abort)?;

    let backend = core_surface::new_backend(settings.backend);
    let bar = Bar::new(settings, left, center, right, backend, abort);
    bar.run()
}

fn core_render_color(s: &str) -> Result<core_render::Color> {
    core_render::Color::parse(s).ok_or_else(|| anyhow!("foreground: {s}: not an rrggbb[aa] color"))
}

/// Verify and build one side's module list. Each entry is
/// `{module_name: {...}}`, dispatched to the module registry by name.
fn modules_for_side(
    bar_node: &ConfigNode,
    side: &str,
    chain: &mut Keychain,
    inherit: &Inherit,
) -> Result<Vec<Box<dyn core_module::Module>>> {
    let Some(list) = bar_node.get(side) else {
        return Ok(Vec::new());
    };
    let entries = list
        .as_list()
        .ok_or_else(|| anyhow!("bar.{side}: must be a list of modules"))?;

    let mut modules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let (name, body) = entry
            .as_tagged()
            .ok_or_else(|| anyhow!("bar.{side}[{index}]: must be {{module: {{...}}}}"))?;
        let iface = core_module::module_iface(name)
            .ok_or_else(|| anyhow!("bar.{side}[{index}]: {name}: no such module"))?;

        chain.push(side);
        chain.push_index(index);
        chain.push(name);
        let verified = (iface.verify_conf)(chain, body);
        chain.pop();
        chain.pop();
        chain.pop();
        verified?;

        modules.push((iface.from_conf)(body, inherit)?);
    }
    Ok(modules)
}

/// SIGINT/SIGTERM write straight into the abort pipe; every poller in the
/// process sees the same fd turn readable.
fn register_signals(abort: &AbortSignal) -> Result<()> {
    let fd = abort.raw_write_fd();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::low_level::pipe::register_raw(signal, fd)
            .with_context(|| format!("failed to register signal {signal}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE: &str = r#"
        [bar]
        height = 26
        location = "top"
        background = "000000cc"
        spacing = 2

        [[bar.left]]
        [bar.left.label]
        content = "hello"

        [[bar.right]]
        [bar.right.clock]
        content = "{time}"
        time-format = "%H:%M:%S"
    "#;

    fn parse(content: &str) -> ConfigNode {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn sample_config_builds_settings_and_modules() {
        let root = parse(SAMPLE);
        let bar_node = root.get("bar").unwrap();

        let mut chain = Keychain::named("bar");
        let settings = core_config::bar_settings_from_node(&mut chain, bar_node).unwrap();
        assert_eq!(settings.height, 26);
        assert_eq!(settings.left_spacing, 2);

        let inherit = Inherit::new(
            Arc::new(FixedFontProvider::default()),
            core_font::FixedFont::standard(),
        );
        let left = modules_for_side(bar_node, "left", &mut chain, &inherit).unwrap();
        let right = modules_for_side(bar_node, "right", &mut chain, &inherit).unwrap();
        let center = modules_for_side(bar_node, "center", &mut chain, &inherit).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(right.len(), 1);
        assert!(center.is_empty());
        assert_eq!(left[0].name(), "label");
        assert_eq!(right[0].name(), "clock");
    }

    #[test]
    fn unknown_module_is_rejected() {
        let root = parse(
            r#"
            [bar]
            height = 20

            [[bar.left]]
            [bar.left.battery]
            "#,
        );
        let bar_node = root.get("bar").unwrap();
        let mut chain = Keychain::named("bar");
        let inherit = Inherit::new(
            Arc::new(FixedFontProvider::default()),
            core_font::FixedFont::standard(),
        );
        let err = modules_for_side(bar_node, "left", &mut chain, &inherit).unwrap_err();
        assert!(err.to_string().contains("battery"), "{err}");
    }

    #[test]
    fn config_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let root: ConfigNode = toml::from_str(&content).unwrap();
        assert!(root.get("bar").is_some());
    }
}
