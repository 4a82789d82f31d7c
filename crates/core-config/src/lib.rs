//! The narrow interface through which configuration reaches the core.
//!
//! The configuration file format and its parser live outside; what arrives
//! here is a [`ConfigNode`] tree. Verification walks that tree *before any
//! thread is spawned* and reports failures with the full key path
//! ("bar.left[0].string.max: expected an integer"), so a bad config can
//! never take down a running bar.
//!
//! The split mirrors the plugin contract: every particle, decoration and
//! module exposes `verify_conf(chain, node)` and `from_conf(node,
//! inherited)`; the helpers in [`verify`] are the vocabulary those
//! implementations are written in.

use core_font::{FontHandle, FontProvider, Shaping};
use core_render::Color;
use std::sync::Arc;

mod node;
pub mod verify;

pub use node::ConfigNode;
pub use verify::{Attr, Keychain};

/// A configuration error, carrying the key path it was found at.
#[derive(Debug, thiserror::Error)]
#[error("{at}: {message}")]
pub struct ConfigError {
    pub at: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(chain: &Keychain, message: impl Into<String>) -> Self {
        Self {
            at: chain.to_string(),
            message: message.into(),
        }
    }
}

pub type VerifyResult = Result<(), ConfigError>;

/// Which display backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Wayland when `WAYLAND_DISPLAY` is set, X11 otherwise.
    #[default]
    Auto,
    Wayland,
    X11,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BackendKind::Auto),
            "wayland" => Ok(BackendKind::Wayland),
            "x11" => Ok(BackendKind::X11),
            other => Err(format!("{other}: not one of auto, wayland, x11")),
        }
    }
}

/// Which screen edge the bar occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    #[default]
    Top,
    Bottom,
}

impl std::str::FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top" => Ok(Location::Top),
            "bottom" => Ok(Location::Bottom),
            other => Err(format!("{other}: not one of top, bottom")),
        }
    }
}

/// The border block: stroke width/color plus per-side outer margins.
#[derive(Debug, Clone, Copy, Default)]
pub struct BorderConfig {
    pub width: i32,
    pub color: Color,
    pub left_margin: i32,
    pub right_margin: i32,
    pub top_margin: i32,
    pub bottom_margin: i32,
}

/// Validated bar geometry and appearance. The three per-side module lists
/// stay as raw nodes; they are dispatched to module factories by name.
#[derive(Debug, Clone, Default)]
pub struct BarSettings {
    pub backend: BackendKind,
    pub monitor: Option<String>,
    pub location: Location,
    pub height: u32,
    pub background: Color,
    pub left_spacing: i32,
    pub right_spacing: i32,
    pub left_margin: i32,
    pub right_margin: i32,
    pub border: BorderConfig,
}

impl BarSettings {
    pub fn height_with_border(&self) -> u32 {
        self.height + 2 * self.border.width.max(0) as u32
    }
}

/// Values a parent particle passes down to its children, plus the font
/// resolver the whole tree shares.
#[derive(Clone)]
pub struct Inherit {
    pub font: FontHandle,
    pub shaping: Shaping,
    pub foreground: Color,
    pub fonts: Arc<dyn FontProvider>,
}

impl Inherit {
    pub fn new(fonts: Arc<dyn FontProvider>, font: FontHandle) -> Self {
        Self {
            font,
            shaping: Shaping::default(),
            foreground: Color::rgba(0xff, 0xff, 0xff, 0xff),
            fonts,
        }
    }
}

/// Parse the `bar` geometry block. `left`/`center`/`right` keys are
/// accepted but handed back untouched for the module dispatcher.
pub fn bar_settings_from_node(chain: &mut Keychain, node: &ConfigNode) -> Result<BarSettings, ConfigError> {
    let mut settings = BarSettings::default();

    let dict = node
        .as_dict()
        .ok_or_else(|| ConfigError::new(chain, "bar: must be a dictionary"))?;

    for (key, value) in dict {
        chain.push(key);
        match key.as_str() {
            "backend" => {
                settings.backend = parse_keyword(chain, value)?;
            }
            "monitor" => {
                settings.monitor = Some(verify::as_string(chain, value)?.to_owned());
            }
            "location" => {
                settings.location = parse_keyword(chain, value)?;
            }
            "height" => {
                settings.height = verify::as_unsigned(chain, value)? as u32;
            }
            "background" => {
                settings.background = verify::as_color(chain, value)?;
            }
            "spacing" => {
                let v = verify::as_int(chain, value)? as i32;
                settings.left_spacing = v;
                settings.right_spacing = v;
            }
            "left-spacing" => settings.left_spacing = verify::as_int(chain, value)? as i32,
            "right-spacing" => settings.right_spacing = verify::as_int(chain, value)? as i32,
            "margin" => {
                let v = verify::as_int(chain, value)? as i32;
                settings.left_margin = v;
                settings.right_margin = v;
            }
            "left-margin" => settings.left_margin = verify::as_int(chain, value)? as i32,
            "right-margin" => settings.right_margin = verify::as_int(chain, value)? as i32,
            "border" => settings.border = border_from_node(chain, value)?,
            "font" | "foreground" | "left" | "center" | "right" => {
                // Consumed elsewhere: fonts/colors by the inherit chain,
                // sides by the module dispatcher.
            }
            other => {
                let err = ConfigError::new(chain, format!("{other}: unknown key"));
                chain.pop();
                return Err(err);
            }
        }
        chain.pop();
    }

    if settings.height == 0 {
        return Err(ConfigError::new(chain, "height: must be set and non-zero"));
    }

    tracing::debug!(
        target: "config",
        height = settings.height,
        location = ?settings.location,
        backend = ?settings.backend,
        monitor = settings.monitor.as_deref(),
        border_width = settings.border.width,
        "bar settings verified"
    );

    Ok(settings)
}

fn border_from_node(chain: &mut Keychain, node: &ConfigNode) -> Result<BorderConfig, ConfigError> {
    let mut border = BorderConfig {
        width: 1,
        ..BorderConfig::default()
    };

    let dict = node
        .as_dict()
        .ok_or_else(|| ConfigError::new(chain, "border: must be a dictionary"))?;

    for (key, value) in dict {
        chain.push(key);
        match key.as_str() {
            "width" => border.width = verify::as_unsigned(chain, value)? as i32,
            "color" => border.color = verify::as_color(chain, value)?,
            "margin" => {
                let v = verify::as_int(chain, value)? as i32;
                border.left_margin = v;
                border.right_margin = v;
                border.top_margin = v;
                border.bottom_margin = v;
            }
            "left-margin" => border.left_margin = verify::as_int(chain, value)? as i32,
            "right-margin" => border.right_margin = verify::as_int(chain, value)? as i32,
            "top-margin" => border.top_margin = verify::as_int(chain, value)? as i32,
            "bottom-margin" => border.bottom_margin = verify::as_int(chain, value)? as i32,
            other => {
                let err = ConfigError::new(chain, format!("{other}: unknown key"));
                chain.pop();
                return Err(err);
            }
        }
        chain.pop();
    }

    Ok(border)
}

fn parse_keyword<T>(chain: &mut Keychain, node: &ConfigNode) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = String>,
{
    verify::as_string(chain, node)?
        .parse()
        .map_err(|e: String| ConfigError::new(chain, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: Vec<(&str, ConfigNode)>) -> ConfigNode {
        ConfigNode::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        )
    }

    #[test]
    fn settings_round_trip() {
        let node = dict(vec![
            ("height", ConfigNode::Int(26)),
            ("location", ConfigNode::Str("bottom".into())),
            ("backend", ConfigNode::Str("x11".into())),
            ("background", ConfigNode::Str("00000066".into())),
            ("spacing", ConfigNode::Int(4)),
            ("left-margin", ConfigNode::Int(8)),
            (
                "border",
                dict(vec![
                    ("width", ConfigNode::Int(2)),
                    ("color", ConfigNode::Str("ffffffff".into())),
                    ("top-margin", ConfigNode::Int(3)),
                ]),
            ),
        ]);

        let mut chain = Keychain::default();
        let settings = bar_settings_from_node(&mut chain, &node).unwrap();
        assert_eq!(settings.height, 26);
        assert_eq!(settings.location, Location::Bottom);
        assert_eq!(settings.backend, BackendKind::X11);
        assert_eq!(settings.left_spacing, 4);
        assert_eq!(settings.right_spacing, 4);
        assert_eq!(settings.left_margin, 8);
        assert_eq!(settings.border.width, 2);
        assert_eq!(settings.border.top_margin, 3);
        assert_eq!(settings.height_with_border(), 30);
    }

    #[test]
    fn missing_height_is_rejected() {
        let node = dict(vec![("location", ConfigNode::Str("top".into()))]);
        let mut chain = Keychain::default();
        assert!(bar_settings_from_node(&mut chain, &node).is_err());
    }

    #[test]
    fn unknown_key_reports_path() {
        let node = dict(vec![
            ("height", ConfigNode::Int(20)),
            ("heigth", ConfigNode::Int(20)),
        ]);
        let mut chain = Keychain::named("bar");
        let err = bar_settings_from_node(&mut chain, &node).unwrap_err();
        assert!(err.to_string().contains("bar.heigth"), "{err}");
    }

    #[test]
    fn bad_keyword_is_rejected() {
        let node = dict(vec![
            ("height", ConfigNode::Int(20)),
            ("location", ConfigNode::Str("left".into())),
        ]);
        let mut chain = Keychain::default();
        assert!(bar_settings_from_node(&mut chain, &node).is_err());
    }
}
