//! The parser-agnostic configuration tree.

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// One node of parsed configuration. Dictionaries preserve declaration
/// order, which the map particle depends on (first matching condition
/// wins).
///
/// Deserializes from any self-describing serde format, so the concrete
/// file syntax stays a front-end decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<ConfigNode>),
    Dict(Vec<(String, ConfigNode)>),
}

impl<'de> Deserialize<'de> for ConfigNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NodeVisitor;

        impl<'de> Visitor<'de> for NodeVisitor {
            type Value = ConfigNode;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a configuration value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
                Ok(ConfigNode::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ConfigNode::Int(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .map(ConfigNode::Int)
                    .map_err(|_| E::custom("integer out of range"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(ConfigNode::Float(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ConfigNode::Str(v.to_owned()))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(ConfigNode::Str(v))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(ConfigNode::List(items))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, ConfigNode>()? {
                    entries.push((key, value));
                }
                Ok(ConfigNode::Dict(entries))
            }
        }

        deserializer.deserialize_any(NodeVisitor)
    }
}

impl ConfigNode {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigNode::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigNode::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigNode::Float(v) => Some(*v),
            ConfigNode::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigNode::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigNode]> {
        match self {
            ConfigNode::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(String, ConfigNode)]> {
        match self {
            ConfigNode::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a dictionary value by key.
    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// For a `{name: body}` wrapper dict (how particles, decorations and
    /// modules are written), the single key and its body.
    pub fn as_tagged(&self) -> Option<(&str, &ConfigNode)> {
        match self.as_dict() {
            Some([(name, body)]) => Some((name.as_str(), body)),
            _ => None,
        }
    }

    /// Human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigNode::Str(_) => "string",
            ConfigNode::Int(_) => "integer",
            ConfigNode::Float(_) => "float",
            ConfigNode::Bool(_) => "boolean",
            ConfigNode::List(_) => "list",
            ConfigNode::Dict(_) => "dictionary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_requires_single_entry() {
        let node = ConfigNode::Dict(vec![("string".into(), ConfigNode::Dict(vec![]))]);
        assert_eq!(node.as_tagged().map(|(n, _)| n), Some("string"));

        let two = ConfigNode::Dict(vec![
            ("a".into(), ConfigNode::Int(1)),
            ("b".into(), ConfigNode::Int(2)),
        ]);
        assert!(two.as_tagged().is_none());
    }

    #[test]
    fn get_preserves_first_match() {
        let node = ConfigNode::Dict(vec![
            ("k".into(), ConfigNode::Int(1)),
            ("k".into(), ConfigNode::Int(2)),
        ]);
        assert_eq!(node.get("k").and_then(ConfigNode::as_int), Some(1));
    }

    #[test]
    fn int_promotes_to_float() {
        assert_eq!(ConfigNode::Int(3).as_float(), Some(3.0));
        assert_eq!(ConfigNode::Float(0.5).as_float(), Some(0.5));
        assert_eq!(ConfigNode::Str("x".into()).as_float(), None);
    }

    #[test]
    fn deserializes_from_a_self_describing_format() {
        let node: ConfigNode = toml::from_str(
            r#"
            height = 26
            utc = true
            scale = 1.5
            left = [{ label = { content = "hi" } }]
            "#,
        )
        .unwrap();

        assert_eq!(node.get("height").and_then(ConfigNode::as_int), Some(26));
        assert_eq!(node.get("utc").and_then(ConfigNode::as_bool), Some(true));
        assert_eq!(node.get("scale").and_then(ConfigNode::as_float), Some(1.5));
        let left = node.get("left").and_then(ConfigNode::as_list).unwrap();
        assert_eq!(left[0].as_tagged().map(|(n, _)| n), Some("label"));
    }

    #[test]
    fn dict_order_is_declaration_order() {
        let node: ConfigNode = toml::from_str("b = 1\na = 2\nc = 3\n").unwrap();
        let keys: Vec<&str> = node
            .as_dict()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, ["b", "a", "c"]);
    }
}
