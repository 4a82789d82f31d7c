//! The list particle: an ordered row of children with inter-sibling
//! spacing. Zero-width children vanish entirely: no width, no spacing.

use anyhow::anyhow;
use core_config::{verify, Attr, ConfigError, ConfigNode, Inherit, Keychain, VerifyResult};
use core_tag::TagSet;

use crate::exposable::Content;
use crate::{conf, Kind, Particle};

pub(crate) struct ListParticle {
    items: Vec<Particle>,
    left_spacing: i32,
    right_spacing: i32,
}

impl ListParticle {
    pub(crate) fn new(items: Vec<Particle>, left_spacing: i32, right_spacing: i32) -> Self {
        Self {
            items,
            left_spacing,
            right_spacing,
        }
    }

    pub(crate) fn instantiate(&self, tags: &TagSet) -> Content {
        Content::List {
            children: self.items.iter().map(|p| p.instantiate(tags)).collect(),
            left_spacing: self.left_spacing,
            right_spacing: self.right_spacing,
        }
    }
}

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let mut attrs = vec![
        Attr::any("items"),
        Attr::optional("spacing", verify::int),
        Attr::optional("left-spacing", verify::int),
        Attr::optional("right-spacing", verify::int),
    ];
    attrs.extend(conf::common_attrs());
    verify::dict(chain, node, &attrs)?;

    let items = node
        .get("items")
        .ok_or_else(|| ConfigError::new(chain, "items: required key missing"))?;
    verify_items(chain, items)
}

fn verify_items(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let items = node
        .as_list()
        .ok_or_else(|| ConfigError::new(chain, "items: must be a list of particles"))?;
    for (idx, item) in items.iter().enumerate() {
        chain.push_index(idx);
        let res = crate::verify_particle(chain, item);
        chain.pop();
        res?;
    }
    Ok(())
}

pub(crate) fn from_conf(node: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Kind> {
    let spacing = node.get("spacing").and_then(ConfigNode::as_int);
    let left_spacing = spacing
        .or_else(|| node.get("left-spacing").and_then(ConfigNode::as_int))
        .unwrap_or(0) as i32;
    let right_spacing = spacing
        .or_else(|| node.get("right-spacing").and_then(ConfigNode::as_int))
        .unwrap_or(2) as i32;

    let items = node
        .get("items")
        .and_then(ConfigNode::as_list)
        .ok_or_else(|| anyhow!("items: missing"))?;

    let particles = items
        .iter()
        .map(|item| crate::conf_to_particle(item, inherit))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Kind::List(ListParticle::new(
        particles,
        left_spacing,
        right_spacing,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_inherit;
    use core_tag::Tag;
    use proptest::prelude::*;

    fn list_node(texts: &[&str], spacing: i64) -> ConfigNode {
        ConfigNode::Dict(vec![(
            "list".into(),
            ConfigNode::Dict(vec![
                (
                    "items".into(),
                    ConfigNode::List(texts.iter().map(|t| ConfigNode::Str((*t).into())).collect()),
                ),
                ("spacing".into(), ConfigNode::Int(spacing)),
            ]),
        )])
    }

    #[test]
    fn shorthand_strings_become_text_children() {
        let node = list_node(&["ab", "c"], 2);
        let mut chain = Keychain::named("particle");
        crate::verify_particle(&mut chain, &node).unwrap();

        let particle = crate::conf_to_particle(&node, &test_inherit()).unwrap();
        let mut e = particle.instantiate(&TagSet::empty());
        // 16 + 8 content plus one (2+2) gap.
        assert_eq!(e.begin_expose(), 16 + 8 + 4);
    }

    #[test]
    fn empty_expansion_consumes_no_spacing() {
        let node = list_node(&["ab", "{gone}", "c"], 3);
        let particle = crate::conf_to_particle(&node, &test_inherit()).unwrap();
        // "{gone}" expands against a set that does define the tag as "".
        let tags = TagSet::new(vec![Tag::new_string("gone", "")]);
        let mut e = particle.instantiate(&tags);
        assert_eq!(e.begin_expose(), 16 + 8 + 6);
    }

    proptest! {
        // Layout additivity: all-positive children sum exactly.
        #[test]
        fn additive_width(widths in proptest::collection::vec(1u8..=20, 1..6),
                          spacing in 0i64..5) {
            let texts: Vec<String> = widths
                .iter()
                .map(|w| "x".repeat(*w as usize))
                .collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let node = list_node(&refs, spacing);
            let particle = crate::conf_to_particle(&node, &test_inherit()).unwrap();
            let mut e = particle.instantiate(&TagSet::empty());

            let n = widths.len() as i32;
            let content: i32 = widths.iter().map(|w| *w as i32 * 8).sum();
            let expected = content + (n - 1) * (2 * spacing as i32);
            prop_assert_eq!(e.begin_expose(), expected);
        }
    }
}
