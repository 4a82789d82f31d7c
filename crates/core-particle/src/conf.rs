//! Particle construction from configuration nodes.
//!
//! A particle entry is either a bare string, shorthand for a text
//! particle, or a `{name: {...}}` dict dispatched to the named plugin.
//! The attributes every particle accepts (margins, on-click, font,
//! foreground, deco, font-shaping) are handled here once; variant bodies
//! see only their own keys.

use std::sync::Arc;

use anyhow::anyhow;
use core_config::{verify, Attr, ConfigError, ConfigNode, Inherit, Keychain, VerifyResult};
use core_events::MouseButton;
use core_font::Shaping;

use crate::{deco, empty, list, map, progress, ramp, string};
use crate::{ClickTemplates, Common, Particle, ParticleIface};

pub(crate) static PARTICLES: &[ParticleIface] = &[
    ParticleIface {
        name: "string",
        verify_conf: string::verify_conf,
        from_conf: string::from_conf,
    },
    ParticleIface {
        name: "empty",
        verify_conf: empty::verify_conf,
        from_conf: empty::from_conf,
    },
    ParticleIface {
        name: "list",
        verify_conf: list::verify_conf,
        from_conf: list::from_conf,
    },
    ParticleIface {
        name: "map",
        verify_conf: map::verify_conf,
        from_conf: map::from_conf,
    },
    ParticleIface {
        name: "ramp",
        verify_conf: ramp::verify_conf,
        from_conf: ramp::from_conf,
    },
    ParticleIface {
        name: "progress-bar",
        verify_conf: progress::verify_conf,
        from_conf: progress::from_conf,
    },
];

/// The attribute table shared by every particle.
pub(crate) fn common_attrs() -> Vec<Attr> {
    vec![
        Attr::optional("margin", verify::unsigned),
        Attr::optional("left-margin", verify::unsigned),
        Attr::optional("right-margin", verify::unsigned),
        Attr::optional("on-click", verify_on_click),
        Attr::optional("font", verify::string),
        Attr::optional("foreground", verify::color),
        Attr::optional("deco", deco_check),
        Attr::optional("font-shaping", verify_shaping),
    ]
}

fn deco_check(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    deco::verify_deco(chain, node)
}

fn verify_shaping(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    match verify::as_string(chain, node)? {
        "full" | "none" => Ok(()),
        other => Err(ConfigError::new(
            chain,
            format!("{other}: not one of full, none"),
        )),
    }
}

fn verify_on_click(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    match node {
        ConfigNode::Str(_) => Ok(()),
        ConfigNode::Dict(entries) => {
            for (key, value) in entries {
                let known = MouseButton::all().iter().any(|b| b.config_key() == key);
                if !known {
                    return Err(ConfigError::new(
                        chain,
                        format!("{key}: not a mouse button"),
                    ));
                }
                chain.scoped(key.clone(), |chain| verify::string(chain, value))?;
            }
            Ok(())
        }
        other => Err(ConfigError::new(
            chain,
            format!(
                "expected a command string or per-button dictionary, got {}",
                other.type_name()
            ),
        )),
    }
}

/// Verify a particle node: shorthand string or `{name: body}`.
pub fn verify_particle(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    if node.as_str().is_some() {
        return Ok(());
    }

    let (name, body) = node
        .as_tagged()
        .ok_or_else(|| ConfigError::new(chain, "particle: must be a string or {name: {...}}"))?;

    let iface = crate::particle_iface(name)
        .ok_or_else(|| ConfigError::new(chain, format!("{name}: no such particle")))?;

    chain.scoped(name.to_owned(), |chain| (iface.verify_conf)(chain, body))
}

/// Build a particle from a verified node, resolving shared attributes
/// against `inherit`.
pub fn conf_to_particle(node: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Particle> {
    if let Some(text) = node.as_str() {
        let common = common_from(&ConfigNode::Dict(Vec::new()), inherit)?;
        return Ok(Particle::assemble(
            common,
            crate::Kind::Text(string::TextParticle::new(text, 0)),
        ));
    }

    let (name, body) = node
        .as_tagged()
        .ok_or_else(|| anyhow!("particle: must be a string or {{name: {{...}}}}"))?;
    let iface =
        crate::particle_iface(name).ok_or_else(|| anyhow!("{name}: no such particle"))?;

    let common = common_from(body, inherit)?;

    // Children inherit this particle's resolved font/foreground/shaping.
    let child_inherit = Inherit {
        font: common.font.clone(),
        shaping: common.shaping,
        foreground: common.foreground,
        fonts: Arc::clone(&inherit.fonts),
    };

    let kind = (iface.from_conf)(body, &child_inherit)?;
    Ok(Particle::assemble(common, kind))
}

fn common_from(body: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Common> {
    let int_attr = |key: &str| body.get(key).and_then(ConfigNode::as_int);

    let margin = int_attr("margin").unwrap_or(0) as i32;
    let left_margin = int_attr("left-margin").unwrap_or(margin as i64) as i32;
    let right_margin = int_attr("right-margin").unwrap_or(margin as i64) as i32;

    let font = match body.get("font").and_then(ConfigNode::as_str) {
        Some(spec) => inherit.fonts.load(spec)?,
        None => inherit.font.clone(),
    };

    let foreground = match body.get("foreground").and_then(ConfigNode::as_str) {
        Some(color) => core_render::Color::parse(color)
            .ok_or_else(|| anyhow!("foreground: {color}: not an rrggbb[aa] color"))?,
        None => inherit.foreground,
    };

    let shaping = match body.get("font-shaping").and_then(ConfigNode::as_str) {
        Some("none") => Shaping::None,
        Some(_) => Shaping::Full,
        None => inherit.shaping,
    };

    let deco = body
        .get("deco")
        .map(deco::deco_from_conf)
        .transpose()?
        .map(Arc::new);

    let mut on_click = ClickTemplates::default();
    match body.get("on-click") {
        Some(ConfigNode::Str(template)) => on_click.set(MouseButton::Left, template.clone()),
        Some(ConfigNode::Dict(entries)) => {
            for (key, value) in entries {
                let button = MouseButton::all()
                    .into_iter()
                    .find(|b| b.config_key() == key)
                    .ok_or_else(|| anyhow!("on-click: {key}: not a mouse button"))?;
                let template = value
                    .as_str()
                    .ok_or_else(|| anyhow!("on-click: {key}: must be a string"))?;
                on_click.set(button, template);
            }
        }
        _ => {}
    }

    Ok(Common {
        left_margin,
        right_margin,
        foreground,
        font,
        shaping,
        deco,
        on_click,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_inherit;
    use core_render::Color;
    use core_tag::TagSet;

    fn text_node(entries: Vec<(&str, ConfigNode)>) -> ConfigNode {
        let mut body = vec![("text".to_owned(), ConfigNode::Str("hi".into()))];
        body.extend(entries.into_iter().map(|(k, v)| (k.to_owned(), v)));
        ConfigNode::Dict(vec![("string".into(), ConfigNode::Dict(body))])
    }

    #[test]
    fn shorthand_string_is_a_text_particle() {
        let particle =
            conf_to_particle(&ConfigNode::Str("plain".into()), &test_inherit()).unwrap();
        let mut e = particle.instantiate(&TagSet::empty());
        assert_eq!(e.begin_expose(), 5 * 8);
    }

    #[test]
    fn margin_is_split_and_overridable() {
        let node = text_node(vec![
            ("margin", ConfigNode::Int(5)),
            ("right-margin", ConfigNode::Int(1)),
        ]);
        let particle = conf_to_particle(&node, &test_inherit()).unwrap();
        assert_eq!(particle.left_margin, 5);
        assert_eq!(particle.right_margin, 1);
    }

    #[test]
    fn foreground_overrides_inherit() {
        let node = text_node(vec![("foreground", ConfigNode::Str("ff0000ff".into()))]);
        let particle = conf_to_particle(&node, &test_inherit()).unwrap();
        assert_eq!(particle.foreground, Color::rgba(255, 0, 0, 255));
    }

    #[test]
    fn on_click_accepts_string_and_dict() {
        let node = text_node(vec![("on-click", ConfigNode::Str("cmd left".into()))]);
        let particle = conf_to_particle(&node, &test_inherit()).unwrap();
        assert_eq!(particle.on_click.get(MouseButton::Left), Some("cmd left"));

        let node = text_node(vec![(
            "on-click",
            ConfigNode::Dict(vec![
                ("right".into(), ConfigNode::Str("cmd right".into())),
                ("wheel-up".into(), ConfigNode::Str("cmd up".into())),
            ]),
        )]);
        let particle = conf_to_particle(&node, &test_inherit()).unwrap();
        assert_eq!(particle.on_click.get(MouseButton::Right), Some("cmd right"));
        assert_eq!(particle.on_click.get(MouseButton::WheelUp), Some("cmd up"));
        assert_eq!(particle.on_click.get(MouseButton::Left), None);
    }

    #[test]
    fn verify_rejects_bad_button() {
        let node = text_node(vec![(
            "on-click",
            ConfigNode::Dict(vec![("doubleclick".into(), ConfigNode::Str("x".into()))]),
        )]);
        let mut chain = Keychain::named("particle");
        assert!(verify_particle(&mut chain, &node).is_err());
    }

    #[test]
    fn verify_rejects_unknown_particle() {
        let node = ConfigNode::Dict(vec![("blink".into(), ConfigNode::Dict(vec![]))]);
        let mut chain = Keychain::named("particle");
        let err = verify_particle(&mut chain, &node).unwrap_err();
        assert!(err.to_string().contains("blink"));
    }

    #[test]
    fn deco_attr_attaches() {
        let node = text_node(vec![(
            "deco",
            ConfigNode::Dict(vec![(
                "background".into(),
                ConfigNode::Dict(vec![("color".into(), ConfigNode::Str("00ff00ff".into()))]),
            )]),
        )]);
        let mut chain = Keychain::named("particle");
        verify_particle(&mut chain, &node).unwrap();
        let particle = conf_to_particle(&node, &test_inherit()).unwrap();
        assert!(particle.deco.is_some());
    }
}
