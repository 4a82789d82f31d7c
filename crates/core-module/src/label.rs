//! A static label. Configuration-only, but it still runs a worker that
//! blocks on the abort signal, preserving the one-thread-per-module
//! invariant the shutdown path relies on.

use anyhow::anyhow;
use core_config::{ConfigNode, Inherit, Keychain, VerifyResult};
use core_particle::{Exposable, Particle};
use core_tag::TagSet;

use crate::{Module, ModuleContext};

struct LabelModule {
    content: Particle,
}

impl Module for LabelModule {
    fn name(&self) -> &'static str {
        "label"
    }

    fn run(&self, ctx: &ModuleContext) -> i32 {
        ctx.bar.refresh();
        ctx.abort.wait();
        0
    }

    fn content(&self) -> Exposable {
        self.content.instantiate(&TagSet::empty())
    }
}

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    core_config::verify::dict(
        chain,
        node,
        &[core_config::Attr::required("content", content_check)],
    )
}

fn content_check(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    core_particle::verify_particle(chain, node)
}

pub(crate) fn from_conf(node: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Box<dyn Module>> {
    let content = node.get("content").ok_or_else(|| anyhow!("content: missing"))?;
    Ok(Box::new(LabelModule {
        content: core_particle::conf_to_particle(content, inherit)?,
    }))
}
