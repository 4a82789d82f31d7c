//! The progress-bar particle.
//!
//! Renders `start · fill×F · indicator · empty×(W−F) · end` for a ranged
//! tag, where `F = ⌊W·(v−min)/(max−min)⌋`. Clicks between the markers are
//! translated into a `where` percentage by the exposable (see
//! `Exposable::progress_mouse`); realtime tags get a refresh scheduled for
//! when the bar would advance by one segment.

use anyhow::anyhow;
use core_config::{verify, Attr, ConfigError, ConfigNode, Inherit, Keychain, VerifyResult};
use core_tag::{RealtimeUnit, TagSet};
use std::time::{Duration, Instant};

use crate::exposable::Content;
use crate::{conf, Kind, Particle};

pub(crate) struct ProgressParticle {
    tag: String,
    length: usize,
    start: Box<Particle>,
    end: Box<Particle>,
    fill: Box<Particle>,
    empty: Box<Particle>,
    indicator: Box<Particle>,
}

impl ProgressParticle {
    pub(crate) fn instantiate(&self, tags: &TagSet) -> Content {
        let tag = tags.tag_for_name(&self.tag);
        if tag.is_none() {
            tracing::warn!(target: "particle.progress", tag = %self.tag, "tag not found");
        }

        let now = Instant::now();
        let (value, min, max) = tag
            .map(|t| (t.current_int(now), t.min(), t.max()))
            .unwrap_or((0, 0, 0));

        let length = self.length as i64;
        let fill_count = if max > min {
            (length * (value - min) / (max - min)).clamp(0, length)
        } else {
            0
        };
        let empty_count = length - fill_count;

        // start + W segments + indicator + end.
        let mut children = Vec::with_capacity(self.length + 3);
        children.push(self.start.instantiate(tags));
        for _ in 0..fill_count {
            children.push(self.fill.instantiate(tags));
        }
        children.push(self.indicator.instantiate(tags));
        for _ in 0..empty_count {
            children.push(self.empty.instantiate(tags));
        }
        children.push(self.end.instantiate(tags));

        if let Some(tag) = tag {
            if tag.realtime_unit() == RealtimeUnit::Milliseconds && max > min && length > 0 {
                // Wake up when the next segment would fill.
                let units_per_segment = (max - min) as f64 / length as f64;
                let units_filled = fill_count as f64 * units_per_segment;
                let until_next = units_per_segment - ((value - min) as f64 - units_filled);
                let delay = Duration::from_millis(until_next.max(1.0) as u64);
                if !tag.refresh_in(delay) {
                    tracing::warn!(
                        target: "particle.progress",
                        tag = %self.tag,
                        "failed to schedule segment refresh"
                    );
                }
            }
        }

        Content::Progress { children }
    }
}

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let mut attrs = vec![
        Attr::required("tag", verify::string),
        Attr::required("length", verify::unsigned),
        Attr::any("start"),
        Attr::any("end"),
        Attr::any("fill"),
        Attr::any("empty"),
        Attr::any("indicator"),
    ];
    attrs.extend(conf::common_attrs());
    verify::dict(chain, node, &attrs)?;

    for key in ["start", "end", "fill", "empty", "indicator"] {
        let sub = node
            .get(key)
            .ok_or_else(|| ConfigError::new(chain, format!("{key}: required key missing")))?;
        chain.scoped(key, |chain| crate::verify_particle(chain, sub))?;
    }
    Ok(())
}

pub(crate) fn from_conf(node: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Kind> {
    let tag = node
        .get("tag")
        .and_then(ConfigNode::as_str)
        .ok_or_else(|| anyhow!("tag: missing"))?;
    let length = node
        .get("length")
        .and_then(ConfigNode::as_int)
        .ok_or_else(|| anyhow!("length: missing"))? as usize;

    let sub = |key: &str| -> anyhow::Result<Box<Particle>> {
        let sub_node = node.get(key).ok_or_else(|| anyhow!("{key}: missing"))?;
        Ok(Box::new(crate::conf_to_particle(sub_node, inherit)?))
    };

    Ok(Kind::Progress(ProgressParticle {
        tag: tag.to_owned(),
        length,
        start: sub("start")?,
        end: sub("end")?,
        fill: sub("fill")?,
        empty: sub("empty")?,
        indicator: sub("indicator")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposable::Content;
    use crate::testutil::test_inherit;
    use core_tag::Tag;

    fn progress_node(length: i64) -> ConfigNode {
        let seg = |c: &str| ConfigNode::Str(c.to_owned());
        ConfigNode::Dict(vec![(
            "progress-bar".into(),
            ConfigNode::Dict(vec![
                ("tag".into(), ConfigNode::Str("pos".into())),
                ("length".into(), ConfigNode::Int(length)),
                ("start".into(), seg("[")),
                ("end".into(), seg("]")),
                ("fill".into(), seg("#")),
                ("empty".into(), seg(".")),
                ("indicator".into(), seg("|")),
            ]),
        )])
    }

    fn child_count(particle: &Particle, tags: &TagSet) -> usize {
        let exposable = particle.instantiate(tags);
        match exposable_content(&exposable) {
            Content::Progress { children } => children.len(),
            _ => panic!("not a progress exposable"),
        }
    }

    // Test-only peek; the content enum is crate-private.
    fn exposable_content(e: &crate::Exposable) -> &Content {
        e.content_for_tests()
    }

    #[test]
    fn emits_length_plus_three_children() {
        let node = progress_node(10);
        let mut chain = Keychain::named("particle");
        crate::verify_particle(&mut chain, &node).unwrap();
        let particle = crate::conf_to_particle(&node, &test_inherit()).unwrap();

        for value in [0, 1, 37, 99, 100] {
            let tags = TagSet::new(vec![Tag::new_range("pos", value, 0, 100)]);
            assert_eq!(child_count(&particle, &tags), 13, "value={value}");
        }
    }

    #[test]
    fn missing_tag_renders_all_empty() {
        let node = progress_node(4);
        let particle = crate::conf_to_particle(&node, &test_inherit()).unwrap();
        assert_eq!(child_count(&particle, &TagSet::empty()), 7);
    }

    #[test]
    fn degenerate_range_has_zero_fill() {
        let node = progress_node(6);
        let particle = crate::conf_to_particle(&node, &test_inherit()).unwrap();
        let tags = TagSet::new(vec![Tag::new_range("pos", 5, 5, 5)]);
        assert_eq!(child_count(&particle, &tags), 9);
    }
}
