//! The map particle and its condition language.
//!
//! A condition is `<tag> <op> <value>` with `op` one of `==`, `!=`, `<`,
//! `<=`, `>`, `>=`; a bare `<tag>` evaluates a boolean tag directly and
//! `~<tag>` negates one. Values may be double-quoted (one layer of quotes
//! is stripped). Conditions are evaluated in declaration order against the
//! tag's own type; the first match wins. Anything that fails to parse or
//! reference at evaluation time is `false`, with a warning; a bad
//! condition must never take a frame down.

use anyhow::anyhow;
use core_config::{ConfigError, ConfigNode, Inherit, Keychain, VerifyResult};
use core_tag::TagSet;
use std::time::Instant;

use crate::exposable::Content;
use crate::{conf, dynlist_exposable, Kind, Particle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Bare boolean tag.
    SelfTruth,
    /// `~tag`: negated boolean tag.
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    tag: String,
    op: Op,
    value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    MissingTag,
    MissingValue,
    InvalidOperator,
    NotWithOperator,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            ParseError::MissingTag => "missing tag",
            ParseError::MissingValue => "missing value",
            ParseError::InvalidOperator => "invalid operator",
            ParseError::NotWithOperator => "'~' cannot be combined with an operator",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ParseError {}

impl Condition {
    /// Parse a condition string. See the module docs for the grammar.
    pub fn parse(input: &str) -> Result<Condition, ParseError> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix('~') {
            let tag = rest.trim();
            if tag.is_empty() {
                return Err(ParseError::MissingTag);
            }
            if tag.contains(['=', '!', '<', '>', '~', ' ']) {
                return Err(ParseError::NotWithOperator);
            }
            return Ok(Condition {
                tag: tag.to_owned(),
                op: Op::Not,
                value: None,
            });
        }

        let Some(op_at) = input.find(['=', '!', '<', '>', '~', ' ']) else {
            if input.is_empty() {
                return Err(ParseError::MissingTag);
            }
            return Ok(Condition {
                tag: input.to_owned(),
                op: Op::SelfTruth,
                value: None,
            });
        };

        let tag = input[..op_at].trim_end();
        if tag.is_empty() {
            return Err(ParseError::MissingTag);
        }

        let rest = input[op_at..].trim_start();
        if rest.is_empty() {
            // Trailing blanks only: a bare tag.
            return Ok(Condition {
                tag: tag.to_owned(),
                op: Op::SelfTruth,
                value: None,
            });
        }

        let (op, value) = if let Some(v) = rest.strip_prefix("==") {
            (Op::Eq, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (Op::Ne, v)
        } else if let Some(v) = rest.strip_prefix("<=") {
            (Op::Le, v)
        } else if let Some(v) = rest.strip_prefix(">=") {
            (Op::Ge, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (Op::Lt, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (Op::Gt, v)
        } else if rest.starts_with('~') {
            return Err(ParseError::NotWithOperator);
        } else {
            return Err(ParseError::InvalidOperator);
        };

        let mut value = value.trim();
        if value.is_empty() {
            return Err(ParseError::MissingValue);
        }
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        Ok(Condition {
            tag: tag.to_owned(),
            op,
            value: Some(value.to_owned()),
        })
    }

    /// Evaluate against a tag set. Type dispatch follows the tag: numeric
    /// comparison for int/float tags, lexicographic for strings, truth for
    /// booleans. Parse failures and unknown tags are `false` + warning.
    pub fn evaluate(&self, tags: &TagSet) -> bool {
        let Some(tag) = tags.tag_for_name(&self.tag) else {
            tracing::warn!(target: "particle.map", tag = %self.tag, "tag not found");
            return false;
        };

        if tag.is_bool() {
            return match self.op {
                Op::SelfTruth => tag.as_bool(),
                Op::Not => !tag.as_bool(),
                _ => {
                    tracing::warn!(
                        target: "particle.map",
                        tag = %self.tag,
                        "boolean tags are used bare or with '~'"
                    );
                    false
                }
            };
        }

        let Some(value) = self.value.as_deref() else {
            // Bare form on a non-boolean tag.
            tracing::warn!(target: "particle.map", tag = %self.tag, "tag is not a boolean");
            return false;
        };

        if tag.is_string() {
            return compare(tag.to_value_string().as_str(), value, self.op);
        }

        if tag.is_float() {
            let Ok(rhs) = value.parse::<f64>() else {
                tracing::warn!(target: "particle.map", value, "cannot parse as float");
                return false;
            };
            return compare(&tag.as_float(), &rhs, self.op);
        }

        let Ok(rhs) = value.parse::<i64>() else {
            tracing::warn!(target: "particle.map", value, "cannot parse as integer");
            return false;
        };
        compare(&tag.current_int(Instant::now()), &rhs, self.op)
    }
}

fn compare<T: PartialOrd + ?Sized>(lhs: &T, rhs: &T, op: Op) -> bool {
    match op {
        Op::Eq => lhs == rhs,
        Op::Ne => lhs != rhs,
        Op::Lt => lhs < rhs,
        Op::Le => lhs <= rhs,
        Op::Gt => lhs > rhs,
        Op::Ge => lhs >= rhs,
        Op::SelfTruth | Op::Not => false,
    }
}

pub(crate) struct MapParticle {
    entries: Vec<(Condition, Particle)>,
    default: Option<Box<Particle>>,
}

impl MapParticle {
    pub(crate) fn instantiate(&self, tags: &TagSet) -> Content {
        let selected = self
            .entries
            .iter()
            .find(|(condition, _)| condition.evaluate(tags))
            .map(|(_, particle)| particle)
            .or(self.default.as_deref());

        let child = match selected {
            Some(particle) => particle.instantiate(tags),
            // No match and no default: a zero-width exposable.
            None => dynlist_exposable(Vec::new(), 0, 0),
        };

        Content::Wrap {
            child: Box::new(child),
            collapse_when_empty: true,
        }
    }
}

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let dict = node
        .as_dict()
        .ok_or_else(|| ConfigError::new(chain, "map: must be a dictionary"))?;

    let common = conf::common_attrs();
    let mut saw_conditions = false;

    for (key, value) in dict {
        match key.as_str() {
            "conditions" => {
                saw_conditions = true;
                chain.scoped("conditions", |chain| verify_conditions(chain, value))?;
            }
            "default" => {
                chain.scoped("default", |chain| crate::verify_particle(chain, value))?;
            }
            other => {
                let Some(attr) = common.iter().find(|a| a.name == other) else {
                    return Err(ConfigError::new(chain, format!("{other}: unknown key")));
                };
                if let Some(check) = attr.check {
                    chain.scoped(other.to_owned(), |chain| check(chain, value))?;
                }
            }
        }
    }

    if !saw_conditions {
        return Err(ConfigError::new(chain, "conditions: required key missing"));
    }
    Ok(())
}

fn verify_conditions(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let entries = node.as_dict().ok_or_else(|| {
        ConfigError::new(chain, "must be a dictionary of condition: particle pairs")
    })?;

    for (condition, particle) in entries {
        if let Err(err) = Condition::parse(condition) {
            return Err(ConfigError::new(chain, format!("\"{condition}\": {err}")));
        }
        chain.scoped(condition.clone(), |chain| {
            crate::verify_particle(chain, particle)
        })?;
    }
    Ok(())
}

pub(crate) fn from_conf(node: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Kind> {
    let conditions = node
        .get("conditions")
        .and_then(ConfigNode::as_dict)
        .ok_or_else(|| anyhow!("conditions: missing"))?;

    let entries = conditions
        .iter()
        .map(|(condition, particle)| {
            let condition = Condition::parse(condition)
                .map_err(|err| anyhow!("\"{condition}\": {err}"))?;
            Ok((condition, crate::conf_to_particle(particle, inherit)?))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let default = node
        .get("default")
        .map(|d| crate::conf_to_particle(d, inherit))
        .transpose()?
        .map(Box::new);

    Ok(Kind::Map(MapParticle { entries, default }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_tag::Tag;

    fn parse(s: &str) -> Condition {
        Condition::parse(s).unwrap()
    }

    #[test]
    fn parses_all_operators() {
        assert_eq!(parse("a == 1").op, Op::Eq);
        assert_eq!(parse("a != 1").op, Op::Ne);
        assert_eq!(parse("a < 1").op, Op::Lt);
        assert_eq!(parse("a <= 1").op, Op::Le);
        assert_eq!(parse("a > 1").op, Op::Gt);
        assert_eq!(parse("a >= 1").op, Op::Ge);
        assert_eq!(parse("a").op, Op::SelfTruth);
        assert_eq!(parse("~a").op, Op::Not);
    }

    #[test]
    fn parses_without_surrounding_blanks() {
        let c = parse("state==charging");
        assert_eq!(c.tag, "state");
        assert_eq!(c.value.as_deref(), Some("charging"));
    }

    #[test]
    fn strips_one_layer_of_quotes() {
        let c = parse("title == \"hello world\"");
        assert_eq!(c.value.as_deref(), Some("hello world"));
        let c = parse("title == \"\"quoted\"\"");
        assert_eq!(c.value.as_deref(), Some("\"quoted\""));
    }

    #[test]
    fn rejects_malformed() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("a = 1").is_err());
        assert!(Condition::parse("a ==").is_err());
        assert!(Condition::parse("~a == 1").is_err());
        assert!(Condition::parse("== 1").is_err());
    }

    fn tags() -> TagSet {
        TagSet::new(vec![
            Tag::new_string("state", "charging"),
            Tag::new_int("capacity", 42),
            Tag::new_float("load", 1.5),
            Tag::new_bool("online", true),
        ])
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        assert!(parse("state == charging").evaluate(&tags()));
        assert!(!parse("state == full").evaluate(&tags()));
        assert!(parse("state < discharging").evaluate(&tags()));
        assert!(parse("state >= charging").evaluate(&tags()));
    }

    #[test]
    fn numeric_comparison_follows_tag_type() {
        assert!(parse("capacity > 40").evaluate(&tags()));
        assert!(!parse("capacity >= 43").evaluate(&tags()));
        assert!(parse("load == 1.5").evaluate(&tags()));
        assert!(parse("load < 2").evaluate(&tags()));
    }

    #[test]
    fn boolean_tags_use_bare_forms() {
        assert!(parse("online").evaluate(&tags()));
        assert!(!parse("~online").evaluate(&tags()));
        // Relational operators on a bool are a warning, not a match.
        assert!(!parse("online == 1").evaluate(&tags()));
    }

    #[test]
    fn failures_evaluate_false() {
        assert!(!parse("missing == 1").evaluate(&tags()));
        assert!(!parse("capacity == notanumber").evaluate(&tags()));
        // Bare non-boolean tag.
        assert!(!parse("capacity").evaluate(&tags()));
    }
}
