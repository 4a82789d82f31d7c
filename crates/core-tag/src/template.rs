//! `{name}` template expansion.
//!
//! A pure function of (template, tags); no side effects beyond a warning
//! log for unknown names, which makes it directly property-testable.

use crate::TagSet;

/// Expand `{name}` spans against `tags`.
///
/// Rules:
/// - `{name}` is replaced with the tag's string form; an unknown name is
///   copied through verbatim (with a warning), which is what lets the
///   progress-bar re-expand a `{where}` placeholder at click time.
/// - `{{` and `}}` are escapes for literal braces.
/// - An unterminated `{...` span is copied through verbatim.
pub fn expand_template(template: &str, tags: &TagSet) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }

                let start = idx + 1;
                let mut end = None;
                for (j, c) in chars.by_ref() {
                    if c == '}' {
                        end = Some(j);
                        break;
                    }
                }

                match end {
                    Some(end) => {
                        let name = &template[start..end];
                        match tags.tag_for_name(name) {
                            Some(tag) => out.push_str(&tag.to_value_string()),
                            None => {
                                tracing::warn!(target: "tag", tag = name, "no such tag in template");
                                out.push_str(&template[idx..=end]);
                            }
                        }
                    }
                    None => {
                        // No closing brace; emit the rest as-is.
                        out.push_str(&template[idx..]);
                        break;
                    }
                }
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                }
                out.push('}');
            }
            _ => out.push(ch),
        }
    }

    out
}
