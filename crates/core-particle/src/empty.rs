//! The empty particle: occupies only its margins. Useful as a spacer and
//! as a progress-bar segment.

use core_config::{verify, ConfigNode, Inherit, Keychain, VerifyResult};

use crate::Kind;

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    verify::dict(chain, node, &crate::conf::common_attrs())
}

pub(crate) fn from_conf(_node: &ConfigNode, _inherit: &Inherit) -> anyhow::Result<Kind> {
    Ok(Kind::Empty)
}
