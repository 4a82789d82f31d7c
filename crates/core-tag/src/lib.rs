//! Typed named values ("tags") and their template expansion.
//!
//! Tags are the only channel between modules and particles: a module
//! publishes a [`TagSet`] snapshot, and particles read it, by name for the
//! value-driven variants (ramp, progress-bar, map) and through `{name}`
//! template substitution for text.
//!
//! Invariants:
//! - A name is non-empty UTF-8 and unique within its set (enforced by the
//!   producers; lookup returns the first match either way).
//! - Ranged values satisfy `min <= value <= max`; `min == max` defines any
//!   derived percentage as 0.
//! - Realtime tags carry the instant they were created; the "current" value
//!   is `value + elapsed`, clamped to the range.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod template;

pub use template::expand_template;

/// Unit of a realtime tag's progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RealtimeUnit {
    #[default]
    None,
    Milliseconds,
}

/// Something that can schedule a timed refresh on behalf of a tag.
///
/// Implemented by the bar handle modules hold; a realtime tag created with
/// an owner lets consumers (the progress-bar particle) request a wakeup for
/// the moment the displayed value would visibly change.
pub trait Refresher: Send + Sync {
    fn refresh_in(&self, delay: Duration);
}

#[derive(Debug, Clone)]
enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Range {
        value: i64,
        min: i64,
        max: i64,
    },
    Realtime {
        value: i64,
        min: i64,
        max: i64,
        unit: RealtimeUnit,
        since: Instant,
    },
}

/// A single named typed value.
#[derive(Clone)]
pub struct Tag {
    name: String,
    value: Value,
    owner: Option<Arc<dyn Refresher>>,
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tag")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish()
    }
}

impl Tag {
    pub fn new_int(name: impl Into<String>, value: i64) -> Self {
        Self::raw(name, Value::Int(value))
    }

    pub fn new_float(name: impl Into<String>, value: f64) -> Self {
        Self::raw(name, Value::Float(value))
    }

    pub fn new_bool(name: impl Into<String>, value: bool) -> Self {
        Self::raw(name, Value::Bool(value))
    }

    pub fn new_string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::raw(name, Value::String(value.into()))
    }

    /// A ranged integer. `value` is clamped into `[min, max]`.
    pub fn new_range(name: impl Into<String>, value: i64, min: i64, max: i64) -> Self {
        Self::raw(
            name,
            Value::Range {
                value: value.clamp(min, max.max(min)),
                min,
                max: max.max(min),
            },
        )
    }

    /// A ranged integer that advances with wall time. The reference instant
    /// is taken here, at creation.
    pub fn new_realtime(
        name: impl Into<String>,
        value: i64,
        min: i64,
        max: i64,
        unit: RealtimeUnit,
    ) -> Self {
        Self::raw(
            name,
            Value::Realtime {
                value: value.clamp(min, max.max(min)),
                min,
                max: max.max(min),
                unit,
                since: Instant::now(),
            },
        )
    }

    fn raw(name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        debug_assert!(!name.is_empty());
        Self {
            name,
            value,
            owner: None,
        }
    }

    /// Attach the refresher consumers may use for timed updates.
    pub fn with_owner(mut self, owner: Arc<dyn Refresher>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_string(&self) -> bool {
        matches!(self.value, Value::String(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.value, Value::Bool(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self.value, Value::Float(_))
    }

    pub fn as_int(&self) -> i64 {
        match &self.value {
            Value::Int(v) | Value::Range { value: v, .. } | Value::Realtime { value: v, .. } => *v,
            Value::Float(v) => *v as i64,
            Value::Bool(v) => *v as i64,
            Value::String(s) => s.parse().unwrap_or(0),
        }
    }

    pub fn as_float(&self) -> f64 {
        match &self.value {
            Value::Float(v) => *v,
            _ => self.as_int() as f64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match &self.value {
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            _ => false,
        }
    }

    /// String form used by template substitution: integers in decimal,
    /// floats with two fractional digits, bools as `true`/`false`.
    pub fn to_value_string(&self) -> String {
        let mut out = String::new();
        match &self.value {
            Value::Int(v) | Value::Range { value: v, .. } | Value::Realtime { value: v, .. } => {
                let _ = write!(out, "{v}");
            }
            Value::Float(v) => {
                let _ = write!(out, "{v:.2}");
            }
            Value::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            Value::String(s) => out.push_str(s),
        }
        out
    }

    /// Range minimum; 0 for unranged tags.
    pub fn min(&self) -> i64 {
        match &self.value {
            Value::Range { min, .. } | Value::Realtime { min, .. } => *min,
            _ => 0,
        }
    }

    /// Range maximum; 0 for unranged tags.
    pub fn max(&self) -> i64 {
        match &self.value {
            Value::Range { max, .. } | Value::Realtime { max, .. } => *max,
            _ => 0,
        }
    }

    pub fn realtime_unit(&self) -> RealtimeUnit {
        match &self.value {
            Value::Realtime { unit, .. } => *unit,
            _ => RealtimeUnit::None,
        }
    }

    /// For realtime tags, the value as of `now`; clamped to the range.
    /// Other tags return their stored value.
    pub fn current_int(&self, now: Instant) -> i64 {
        match &self.value {
            Value::Realtime {
                value,
                min,
                max,
                unit,
                since,
            } => {
                let elapsed = now.saturating_duration_since(*since);
                let delta = match unit {
                    RealtimeUnit::None => 0,
                    RealtimeUnit::Milliseconds => elapsed.as_millis().min(i64::MAX as u128) as i64,
                };
                value.saturating_add(delta).clamp(*min, *max)
            }
            _ => self.as_int(),
        }
    }

    /// Ask the owning module to refresh the bar after `delay`. Returns
    /// `false` when the tag has no owner attached.
    pub fn refresh_in(&self, delay: Duration) -> bool {
        match &self.owner {
            Some(owner) => {
                owner.refresh_in(delay);
                true
            }
            None => false,
        }
    }
}

/// An ordered collection of tags. Lookup is linear; sets are small.
#[derive(Debug, Clone, Default)]
pub struct TagSet {
    tags: Vec<Tag>,
}

impl TagSet {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self { tags }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tag_for_name(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl From<Vec<Tag>> for TagSet {
    fn from(tags: Vec<Tag>) -> Self {
        Self::new(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_strings() {
        assert_eq!(Tag::new_int("n", -3).to_value_string(), "-3");
        assert_eq!(Tag::new_float("n", 1.5).to_value_string(), "1.50");
        assert_eq!(Tag::new_float("n", 2.0).to_value_string(), "2.00");
        assert_eq!(Tag::new_bool("n", true).to_value_string(), "true");
        assert_eq!(Tag::new_bool("n", false).to_value_string(), "false");
        assert_eq!(Tag::new_string("n", "hi").to_value_string(), "hi");
    }

    #[test]
    fn range_clamps_on_creation() {
        let t = Tag::new_range("cap", 150, 0, 100);
        assert_eq!(t.as_int(), 100);
        assert_eq!(t.min(), 0);
        assert_eq!(t.max(), 100);
    }

    #[test]
    fn degenerate_range_is_tolerated() {
        let t = Tag::new_range("x", 5, 10, 10);
        assert_eq!(t.as_int(), 10);
        assert_eq!(t.min(), t.max());
    }

    #[test]
    fn lookup_finds_first_match() {
        let set = TagSet::new(vec![Tag::new_int("a", 1), Tag::new_int("b", 2)]);
        assert_eq!(set.tag_for_name("b").unwrap().as_int(), 2);
        assert!(set.tag_for_name("c").is_none());
    }

    #[test]
    fn realtime_advances_and_clamps() {
        let t = Tag::new_realtime("elapsed", 900, 0, 1000, RealtimeUnit::Milliseconds);
        let now = Instant::now();
        let current = t.current_int(now + Duration::from_millis(50));
        assert!((940..=960).contains(&current), "current={current}");
        // Far future clamps at max.
        assert_eq!(t.current_int(now + Duration::from_secs(60)), 1000);
    }

    #[test]
    fn realtime_unit_none_is_static() {
        let t = Tag::new_realtime("pos", 10, 0, 100, RealtimeUnit::None);
        assert_eq!(t.current_int(Instant::now() + Duration::from_secs(5)), 10);
    }

    #[test]
    fn refresh_without_owner_reports_false() {
        let t = Tag::new_realtime("pos", 0, 0, 10, RealtimeUnit::Milliseconds);
        assert!(!t.refresh_in(Duration::from_millis(100)));
    }

    #[test]
    fn refresh_with_owner_forwards() {
        use std::sync::atomic::{AtomicU64, Ordering};

        struct Recorder(AtomicU64);
        impl Refresher for Recorder {
            fn refresh_in(&self, delay: Duration) {
                self.0.store(delay.as_millis() as u64, Ordering::SeqCst);
            }
        }

        let rec = Arc::new(Recorder(AtomicU64::new(0)));
        let t = Tag::new_realtime("pos", 0, 0, 10, RealtimeUnit::Milliseconds)
            .with_owner(rec.clone());
        assert!(t.refresh_in(Duration::from_millis(250)));
        assert_eq!(rec.0.load(Ordering::SeqCst), 250);
    }
}
