//! Decorations: shapes drawn behind a particle's content, across its full
//! bounding box including margins. All drawing is OVER-compositing; stacks
//! draw back-to-front (index 0 first).

use anyhow::anyhow;
use core_config::{verify, Attr, ConfigError, ConfigNode, Keychain, VerifyResult};
use core_render::{Color, Surface};

use crate::DecoIface;

#[derive(Debug, Clone)]
pub enum Decoration {
    Background { color: Color },
    Border { color: Color, size: i32 },
    Underline { size: i32, color: Color },
    Overline { size: i32, color: Color },
    Stack(Vec<Decoration>),
}

impl Decoration {
    pub fn expose(&self, surface: &mut Surface, x: i32, y: i32, width: i32, height: i32) {
        match self {
            Decoration::Background { color } => {
                surface.fill_rect(x, y, width, height, *color);
            }
            Decoration::Border { color, size } => {
                let b = (*size).min(width).min(height);
                surface.fill_rect(x, y, width, b, *color);
                surface.fill_rect(x, (y + height - b).max(y), width, b, *color);
                surface.fill_rect(x, y, b, height, *color);
                surface.fill_rect((x + width - b).max(x), y, b, height, *color);
            }
            Decoration::Underline { size, color } => {
                let s = (*size).min(height);
                surface.fill_rect(x, y + height - s, width, s, *color);
            }
            Decoration::Overline { size, color } => {
                surface.fill_rect(x, y, width, (*size).min(height), *color);
            }
            Decoration::Stack(layers) => {
                for layer in layers {
                    layer.expose(surface, x, y, width, height);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration plugins
// ---------------------------------------------------------------------------

pub(crate) static DECORATIONS: &[DecoIface] = &[
    DecoIface {
        name: "background",
        verify_conf: verify_background,
        from_conf: background_from_conf,
    },
    DecoIface {
        name: "border",
        verify_conf: verify_border,
        from_conf: border_from_conf,
    },
    DecoIface {
        name: "underline",
        verify_conf: verify_line,
        from_conf: underline_from_conf,
    },
    DecoIface {
        name: "overline",
        verify_conf: verify_line,
        from_conf: overline_from_conf,
    },
    DecoIface {
        name: "stack",
        verify_conf: verify_stack,
        from_conf: stack_from_conf,
    },
];

/// Verify a `{name: body}` decoration node.
pub(crate) fn verify_deco(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let (name, body) = node
        .as_tagged()
        .ok_or_else(|| ConfigError::new(chain, "decoration: must be {name: {...}}"))?;

    let iface = crate::deco_iface(name)
        .ok_or_else(|| ConfigError::new(chain, format!("{name}: no such decoration")))?;

    chain.scoped(name.to_owned(), |chain| (iface.verify_conf)(chain, body))
}

/// Instantiate a verified `{name: body}` decoration node.
pub(crate) fn deco_from_conf(node: &ConfigNode) -> anyhow::Result<Decoration> {
    let (name, body) = node
        .as_tagged()
        .ok_or_else(|| anyhow!("decoration: must be {{name: {{...}}}}"))?;
    let iface =
        crate::deco_iface(name).ok_or_else(|| anyhow!("{name}: no such decoration"))?;
    (iface.from_conf)(body)
}

fn verify_background(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    verify::dict(chain, node, &[Attr::required("color", verify::color)])
}

fn background_from_conf(node: &ConfigNode) -> anyhow::Result<Decoration> {
    Ok(Decoration::Background {
        color: required_color(node)?,
    })
}

fn verify_border(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    verify::dict(
        chain,
        node,
        &[
            Attr::required("color", verify::color),
            Attr::optional("size", verify::unsigned),
        ],
    )
}

fn border_from_conf(node: &ConfigNode) -> anyhow::Result<Decoration> {
    Ok(Decoration::Border {
        color: required_color(node)?,
        size: node.get("size").and_then(ConfigNode::as_int).unwrap_or(1) as i32,
    })
}

fn verify_line(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    verify::dict(
        chain,
        node,
        &[
            Attr::required("color", verify::color),
            Attr::required("size", verify::unsigned),
        ],
    )
}

fn underline_from_conf(node: &ConfigNode) -> anyhow::Result<Decoration> {
    Ok(Decoration::Underline {
        size: node.get("size").and_then(ConfigNode::as_int).unwrap_or(1) as i32,
        color: required_color(node)?,
    })
}

fn overline_from_conf(node: &ConfigNode) -> anyhow::Result<Decoration> {
    Ok(Decoration::Overline {
        size: node.get("size").and_then(ConfigNode::as_int).unwrap_or(1) as i32,
        color: required_color(node)?,
    })
}

fn verify_stack(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let items = node
        .as_list()
        .ok_or_else(|| ConfigError::new(chain, "stack: must be a list of decorations"))?;
    for (idx, item) in items.iter().enumerate() {
        chain.push_index(idx);
        let res = verify_deco(chain, item);
        chain.pop();
        res?;
    }
    Ok(())
}

fn stack_from_conf(node: &ConfigNode) -> anyhow::Result<Decoration> {
    let items = node
        .as_list()
        .ok_or_else(|| anyhow!("stack: must be a list of decorations"))?;
    Ok(Decoration::Stack(
        items.iter().map(deco_from_conf).collect::<Result<_, _>>()?,
    ))
}

fn required_color(node: &ConfigNode) -> anyhow::Result<Color> {
    node.get("color")
        .and_then(ConfigNode::as_str)
        .and_then(Color::parse)
        .ok_or_else(|| anyhow!("color: missing or malformed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(surface: &Surface, x: u32, y: u32) -> (u8, u8, u8, u8) {
        surface.pixel(x, y).unwrap()
    }

    const RED: Color = Color::rgba(255, 0, 0, 255);
    const BLUE: Color = Color::rgba(0, 0, 255, 255);

    #[test]
    fn underline_sits_at_the_bottom() {
        let mut surface = Surface::new(4, 4);
        Decoration::Underline {
            size: 1,
            color: RED,
        }
        .expose(&mut surface, 0, 0, 4, 4);
        assert_eq!(px(&surface, 0, 3).0, 255);
        assert_eq!(px(&surface, 0, 0).0, 0);
    }

    #[test]
    fn overline_sits_at_the_top() {
        let mut surface = Surface::new(4, 4);
        Decoration::Overline {
            size: 2,
            color: RED,
        }
        .expose(&mut surface, 0, 0, 4, 4);
        assert_eq!(px(&surface, 0, 0).0, 255);
        assert_eq!(px(&surface, 0, 1).0, 255);
        assert_eq!(px(&surface, 0, 2).0, 0);
    }

    #[test]
    fn border_leaves_the_interior_untouched() {
        let mut surface = Surface::new(5, 5);
        Decoration::Border {
            color: RED,
            size: 1,
        }
        .expose(&mut surface, 0, 0, 5, 5);
        assert_eq!(px(&surface, 0, 0).0, 255);
        assert_eq!(px(&surface, 4, 4).0, 255);
        assert_eq!(px(&surface, 2, 2).0, 0);
    }

    #[test]
    fn stack_draws_in_order() {
        let mut surface = Surface::new(2, 2);
        Decoration::Stack(vec![
            Decoration::Background { color: RED },
            Decoration::Background { color: BLUE },
        ])
        .expose(&mut surface, 0, 0, 2, 2);
        // Last layer wins.
        assert_eq!(px(&surface, 0, 0), (0, 0, 255, 255));
    }

    #[test]
    fn conf_round_trip() {
        let node = ConfigNode::Dict(vec![(
            "stack".into(),
            ConfigNode::List(vec![
                ConfigNode::Dict(vec![(
                    "background".into(),
                    ConfigNode::Dict(vec![("color".into(), ConfigNode::Str("ff0000ff".into()))]),
                )]),
                ConfigNode::Dict(vec![(
                    "underline".into(),
                    ConfigNode::Dict(vec![
                        ("color".into(), ConfigNode::Str("00ff00ff".into())),
                        ("size".into(), ConfigNode::Int(2)),
                    ]),
                )]),
            ]),
        )]);

        let mut chain = Keychain::named("deco");
        verify_deco(&mut chain, &node).unwrap();
        let deco = deco_from_conf(&node).unwrap();
        match deco {
            Decoration::Stack(layers) => assert_eq!(layers.len(), 2),
            other => panic!("expected stack, got {other:?}"),
        }
    }

    #[test]
    fn conf_rejects_unknown_decoration() {
        let node = ConfigNode::Dict(vec![("glow".into(), ConfigNode::Dict(vec![]))]);
        let mut chain = Keychain::named("deco");
        assert!(verify_deco(&mut chain, &node).is_err());
    }
}
