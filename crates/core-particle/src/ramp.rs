//! The ramp particle: selects one of N children by where a ranged tag's
//! value falls within `[min, max]`.

use anyhow::anyhow;
use core_config::{verify, Attr, ConfigError, ConfigNode, Inherit, Keychain, VerifyResult};
use core_tag::TagSet;
use std::time::Instant;

use crate::exposable::Content;
use crate::{conf, dynlist_exposable, Kind, Particle};

pub(crate) struct RampParticle {
    tag: String,
    items: Vec<Particle>,
}

impl RampParticle {
    pub(crate) fn instantiate(&self, tags: &TagSet) -> Content {
        let Some(tag) = tags.tag_for_name(&self.tag) else {
            tracing::warn!(target: "particle.ramp", tag = %self.tag, "tag not found");
            return Content::Wrap {
                child: Box::new(dynlist_exposable(Vec::new(), 0, 0)),
                collapse_when_empty: false,
            };
        };

        let index = ramp_index(
            tag.current_int(Instant::now()),
            tag.min(),
            tag.max(),
            self.items.len(),
        );

        Content::Wrap {
            child: Box::new(self.items[index].instantiate(tags)),
            collapse_when_empty: false,
        }
    }
}

/// `clamp(floor(N * (v - min) / (max - min)), 0, N - 1)`; a degenerate
/// range selects index 0.
fn ramp_index(value: i64, min: i64, max: i64, count: usize) -> usize {
    debug_assert!(count > 0);
    if max <= min {
        return 0;
    }
    let value = value.clamp(min, max);
    let index = (count as i64 * (value - min)) / (max - min);
    index.clamp(0, count as i64 - 1) as usize
}

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let mut attrs = vec![Attr::required("tag", verify::string), Attr::any("items")];
    attrs.extend(conf::common_attrs());
    verify::dict(chain, node, &attrs)?;

    let items = node
        .get("items")
        .ok_or_else(|| ConfigError::new(chain, "items: required key missing"))?;
    let list = items
        .as_list()
        .ok_or_else(|| ConfigError::new(chain, "items: must be a list of particles"))?;
    if list.is_empty() {
        return Err(ConfigError::new(chain, "items: must not be empty"));
    }
    for (idx, item) in list.iter().enumerate() {
        chain.push_index(idx);
        let res = crate::verify_particle(chain, item);
        chain.pop();
        res?;
    }
    Ok(())
}

pub(crate) fn from_conf(node: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Kind> {
    let tag = node
        .get("tag")
        .and_then(ConfigNode::as_str)
        .ok_or_else(|| anyhow!("tag: missing"))?;
    let items = node
        .get("items")
        .and_then(ConfigNode::as_list)
        .ok_or_else(|| anyhow!("items: missing"))?;

    Ok(Kind::Ramp(RampParticle {
        tag: tag.to_owned(),
        items: items
            .iter()
            .map(|item| crate::conf_to_particle(item, inherit))
            .collect::<Result<_, _>>()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn battery_ramp_selects_expected_icons() {
        // Four icons over 0..100: thresholds at 25, 50, 75.
        assert_eq!(ramp_index(0, 0, 100, 4), 0);
        assert_eq!(ramp_index(24, 0, 100, 4), 0);
        assert_eq!(ramp_index(25, 0, 100, 4), 1);
        assert_eq!(ramp_index(50, 0, 100, 4), 2);
        assert_eq!(ramp_index(75, 0, 100, 4), 3);
        assert_eq!(ramp_index(100, 0, 100, 4), 3);
    }

    #[test]
    fn degenerate_range_selects_first() {
        assert_eq!(ramp_index(5, 5, 5, 3), 0);
        assert_eq!(ramp_index(9, 10, 2, 3), 0);
    }

    #[test]
    fn out_of_range_values_clamp() {
        assert_eq!(ramp_index(-10, 0, 100, 4), 0);
        assert_eq!(ramp_index(400, 0, 100, 4), 3);
    }

    proptest! {
        // Monotonicity: increasing v never decreases the index, and the
        // full sweep visits index 0 and N-1.
        #[test]
        fn monotone_over_the_range(count in 1usize..8, max in 1i64..500) {
            let mut last = 0usize;
            for v in 0..=max {
                let idx = ramp_index(v, 0, max, count);
                prop_assert!(idx >= last);
                prop_assert!(idx < count);
                last = idx;
            }
            prop_assert_eq!(ramp_index(0, 0, max, count), 0);
            prop_assert_eq!(ramp_index(max, 0, max, count), count - 1);
        }
    }
}
