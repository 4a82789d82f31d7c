//! Keychain-addressed verification helpers.
//!
//! Every checker takes the current [`Keychain`] so failures point at the
//! exact key, and returns the typed value where callers want it. The
//! [`dict`] helper drives an attribute table the way plugin `verify_conf`
//! implementations declare one: name, required flag, checker.

use crate::{ConfigError, ConfigNode, VerifyResult};
use core_render::Color;

/// The path of keys leading to the node currently being verified.
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    parts: Vec<String>,
}

impl Keychain {
    pub fn named(root: impl Into<String>) -> Self {
        Self {
            parts: vec![root.into()],
        }
    }

    pub fn push(&mut self, part: impl Into<String>) {
        self.parts.push(part.into());
    }

    pub fn push_index(&mut self, index: usize) {
        self.parts.push(format!("[{index}]"));
    }

    pub fn pop(&mut self) {
        self.parts.pop();
    }

    /// Run `f` with `part` appended, restoring the chain afterwards.
    pub fn scoped<T>(
        &mut self,
        part: impl Into<String>,
        f: impl FnOnce(&mut Keychain) -> T,
    ) -> T {
        self.push(part);
        let out = f(self);
        self.pop();
        out
    }
}

impl std::fmt::Display for Keychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first && !part.starts_with('[') {
                f.write_str(".")?;
            }
            f.write_str(part)?;
            first = false;
        }
        Ok(())
    }
}

/// One attribute of a dictionary-shaped config value.
pub struct Attr {
    pub name: &'static str,
    pub required: bool,
    /// `None` accepts any value (attributes consumed by the caller).
    pub check: Option<fn(&mut Keychain, &ConfigNode) -> VerifyResult>,
}

impl Attr {
    pub const fn required(
        name: &'static str,
        check: fn(&mut Keychain, &ConfigNode) -> VerifyResult,
    ) -> Self {
        Self {
            name,
            required: true,
            check: Some(check),
        }
    }

    pub const fn optional(
        name: &'static str,
        check: fn(&mut Keychain, &ConfigNode) -> VerifyResult,
    ) -> Self {
        Self {
            name,
            required: false,
            check: Some(check),
        }
    }

    pub const fn any(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            check: None,
        }
    }
}

pub fn as_string<'n>(chain: &Keychain, node: &'n ConfigNode) -> Result<&'n str, ConfigError> {
    node.as_str()
        .ok_or_else(|| ConfigError::new(chain, format!("expected a string, got {}", node.type_name())))
}

pub fn as_int(chain: &Keychain, node: &ConfigNode) -> Result<i64, ConfigError> {
    node.as_int()
        .ok_or_else(|| ConfigError::new(chain, format!("expected an integer, got {}", node.type_name())))
}

pub fn as_unsigned(chain: &Keychain, node: &ConfigNode) -> Result<u64, ConfigError> {
    let v = as_int(chain, node)?;
    u64::try_from(v).map_err(|_| ConfigError::new(chain, "expected a non-negative integer"))
}

pub fn as_bool(chain: &Keychain, node: &ConfigNode) -> Result<bool, ConfigError> {
    node.as_bool()
        .ok_or_else(|| ConfigError::new(chain, format!("expected a boolean, got {}", node.type_name())))
}

pub fn as_color(chain: &Keychain, node: &ConfigNode) -> Result<Color, ConfigError> {
    let s = as_string(chain, node)?;
    Color::parse(s)
        .ok_or_else(|| ConfigError::new(chain, format!("{s}: not an rrggbb[aa] color")))
}

pub fn string(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    as_string(chain, node).map(|_| ())
}

pub fn int(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    as_int(chain, node).map(|_| ())
}

pub fn unsigned(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    as_unsigned(chain, node).map(|_| ())
}

pub fn boolean(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    as_bool(chain, node).map(|_| ())
}

pub fn color(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    as_color(chain, node).map(|_| ())
}

/// Verify a dictionary against an attribute table: every present key must
/// be declared and pass its checker, every required key must be present.
pub fn dict(chain: &mut Keychain, node: &ConfigNode, attrs: &[Attr]) -> VerifyResult {
    let entries = node
        .as_dict()
        .ok_or_else(|| ConfigError::new(chain, format!("expected a dictionary, got {}", node.type_name())))?;

    for (key, value) in entries {
        let Some(attr) = attrs.iter().find(|a| a.name == key) else {
            return Err(ConfigError::new(chain, format!("{key}: unknown key")));
        };
        if let Some(check) = attr.check {
            chain.scoped(key.clone(), |chain| check(chain, value))?;
        }
    }

    for attr in attrs.iter().filter(|a| a.required) {
        if node.get(attr.name).is_none() {
            return Err(ConfigError::new(
                chain,
                format!("{}: required key missing", attr.name),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigNode {
        ConfigNode::Dict(vec![
            ("text".into(), ConfigNode::Str("hello".into())),
            ("max".into(), ConfigNode::Int(12)),
        ])
    }

    const ATTRS: &[Attr] = &[
        Attr::required("text", string),
        Attr::optional("max", unsigned),
    ];

    #[test]
    fn accepts_valid_dict() {
        let mut chain = Keychain::named("string");
        assert!(dict(&mut chain, &sample(), ATTRS).is_ok());
    }

    #[test]
    fn rejects_unknown_key() {
        let node = ConfigNode::Dict(vec![("nope".into(), ConfigNode::Int(1))]);
        let mut chain = Keychain::named("string");
        let err = dict(&mut chain, &node, ATTRS).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn rejects_missing_required() {
        let node = ConfigNode::Dict(vec![("max".into(), ConfigNode::Int(1))]);
        let mut chain = Keychain::named("string");
        let err = dict(&mut chain, &node, ATTRS).unwrap_err();
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn error_path_includes_indices() {
        let mut chain = Keychain::named("bar");
        chain.push("left");
        chain.push_index(2);
        chain.push("string");
        assert_eq!(chain.to_string(), "bar.left[2].string");
    }

    #[test]
    fn negative_unsigned_is_rejected() {
        let node = ConfigNode::Dict(vec![
            ("text".into(), ConfigNode::Str("x".into())),
            ("max".into(), ConfigNode::Int(-1)),
        ]);
        let mut chain = Keychain::named("string");
        assert!(dict(&mut chain, &node, ATTRS).is_err());
    }
}
