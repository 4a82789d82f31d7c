//! The text particle.
//!
//! Instantiation expands the template and applies max-length truncation;
//! the expensive part, shaping the expanded text into positioned glyphs,
//! happens in `begin_expose` and is cached per particle. Cache entries are
//! keyed by a hash of the expanded text and carry an in-use flag held for
//! as long as a live exposable references them; entries not in use are
//! reused before the cache grows.

use std::hash::BuildHasher;
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::RandomState;
use anyhow::anyhow;
use core_config::{verify, Attr, ConfigNode, Inherit, Keychain, VerifyResult};
use core_font::{FontHandle, Glyph, ShapedRun, Shaping};
use core_render::{Color, Surface};
use core_tag::TagSet;
use unicode_segmentation::UnicodeSegmentation;

use crate::exposable::Content;
use crate::{Kind, Particle};

pub(crate) struct TextParticle {
    template: String,
    max_len: usize,
    cache: Arc<Mutex<RunCache>>,
}

impl TextParticle {
    pub(crate) fn new(template: impl Into<String>, max_len: usize) -> Self {
        Self {
            template: template.into(),
            max_len,
            cache: Arc::new(Mutex::new(RunCache::default())),
        }
    }

    pub(crate) fn instantiate(&self, particle: &Particle, tags: &TagSet) -> Content {
        let mut text = core_tag::expand_template(&self.template, tags);
        if self.max_len > 0 {
            text = truncate(text, self.max_len);
        }

        Content::Text(TextContent {
            text,
            font: particle.font.clone(),
            foreground: particle.foreground,
            shaping: particle.shaping,
            cache: self.cache.clone(),
            run: None,
        })
    }

    #[cfg(test)]
    pub(crate) fn cache_entries(&self) -> usize {
        self.cache.lock().unwrap().entries.len()
    }
}

/// Cut `text` to at most `max` scalar values, with a three-dot tail when
/// there is room for one (`max >= 4`). Cuts never split a scalar; operating
/// on char boundaries guarantees that.
fn truncate(text: String, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text;
    }

    if max >= 4 {
        let keep = text
            .char_indices()
            .nth(max - 3)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        let mut out = text[..keep].to_owned();
        out.push_str("...");
        out
    } else {
        let keep = text
            .char_indices()
            .nth(max)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        text[..keep].to_owned()
    }
}

pub(crate) struct TextContent {
    text: String,
    font: FontHandle,
    foreground: Color,
    shaping: Shaping,
    cache: Arc<Mutex<RunCache>>,
    run: Option<RunHandle>,
}

enum RunHandle {
    /// A shaped run borrowed from the particle cache; released on drop.
    Cached {
        run: Arc<ShapedRun>,
        width: i32,
        index: usize,
    },
    /// Per-cluster glyphs with explicit kerning, used when the font cannot
    /// shape or shaping is disabled.
    Owned { glyphs: Vec<Glyph>, kerns: Vec<i32> },
}

impl TextContent {
    /// Shape (or fetch from cache) and return the content width.
    pub(crate) fn begin_expose(&mut self) -> i32 {
        let mut cache = lock_cache(&self.cache);
        let hash = cache.hash_of(&self.text);

        if let Some((index, run, width)) = cache.acquire(hash) {
            self.run = Some(RunHandle::Cached { run, width, index });
            return width;
        }

        if self.shaping == Shaping::Full {
            if let Some(run) = self.font.rasterize_run(&self.text) {
                let width = run.advance();
                let (index, run) = cache.insert(hash, run, width);
                self.run = Some(RunHandle::Cached { run, width, index });
                return width;
            }
        }

        drop(cache);

        // Unshaped fallback: one glyph per grapheme cluster's first scalar,
        // with pairwise kerning.
        let mut glyphs = Vec::new();
        let mut kerns = Vec::new();
        let mut width = 0;
        let mut previous: Option<char> = None;

        for cluster in self.text.graphemes(true) {
            let Some(ch) = cluster.chars().next() else {
                continue;
            };
            let Some(glyph) = self.font.rasterize(ch) else {
                // Missing glyph: zero width, nothing drawn.
                previous = Some(ch);
                continue;
            };
            let kern = previous.map(|p| self.font.kerning(p, ch)).unwrap_or(0);
            width += kern + glyph.advance;
            glyphs.push(glyph);
            kerns.push(kern);
            previous = Some(ch);
        }

        self.run = Some(RunHandle::Owned { glyphs, kerns });
        width
    }

    pub(crate) fn expose(&self, surface: &mut Surface, x: i32, y: i32, height: i32) {
        let Some(run) = &self.run else {
            return;
        };

        // Center the ascent-part of the font on the bar center; a negative
        // descent is ignored except in the height term.
        let ascent = self.font.ascent();
        let descent = self.font.descent();
        let baseline = y + (height + ascent + descent) / 2 - descent.max(0);

        let mut pen = x;
        match run {
            RunHandle::Cached { run, .. } => {
                for glyph in &run.glyphs {
                    surface.draw_glyph(pen, baseline, glyph, self.foreground);
                    pen += glyph.advance;
                }
            }
            RunHandle::Owned { glyphs, kerns } => {
                for (glyph, kern) in glyphs.iter().zip(kerns.iter()) {
                    pen += kern;
                    surface.draw_glyph(pen, baseline, glyph, self.foreground);
                    pen += glyph.advance;
                }
            }
        }
    }
}

impl Drop for TextContent {
    fn drop(&mut self) {
        if let Some(RunHandle::Cached { index, .. }) = &self.run {
            lock_cache(&self.cache).release(*index);
        }
    }
}

/// Cache locking tolerates poisoning: a panicked sibling render leaves
/// entries at worst marked in-use, never structurally broken.
fn lock_cache(cache: &Mutex<RunCache>) -> MutexGuard<'_, RunCache> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The per-particle shaped-run cache. Sized on demand: a lookup miss first
/// tries to evict an entry that is not in use, and only grows the vector
/// when every entry is referenced by a live exposable.
#[derive(Default)]
struct RunCache {
    entries: Vec<CacheEntry>,
    hasher: RandomState,
}

struct CacheEntry {
    hash: u64,
    run: Arc<ShapedRun>,
    width: i32,
    in_use: bool,
}

impl RunCache {
    fn hash_of(&self, text: &str) -> u64 {
        self.hasher.hash_one(text)
    }

    fn acquire(&mut self, hash: u64) -> Option<(usize, Arc<ShapedRun>, i32)> {
        let (index, entry) = self
            .entries
            .iter_mut()
            .enumerate()
            .find(|(_, e)| e.hash == hash)?;
        entry.in_use = true;
        Some((index, entry.run.clone(), entry.width))
    }

    fn insert(&mut self, hash: u64, run: ShapedRun, width: i32) -> (usize, Arc<ShapedRun>) {
        let run = Arc::new(run);
        let entry = CacheEntry {
            hash,
            run: run.clone(),
            width,
            in_use: true,
        };

        match self.entries.iter().position(|e| !e.in_use) {
            Some(index) => {
                self.entries[index] = entry;
                (index, run)
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1, run)
            }
        }
    }

    fn release(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.in_use = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration plugin
// ---------------------------------------------------------------------------

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    let mut attrs = vec![
        Attr::required("text", verify::string),
        Attr::optional("max", verify::unsigned),
    ];
    attrs.extend(crate::conf::common_attrs());
    verify::dict(chain, node, &attrs)
}

pub(crate) fn from_conf(node: &ConfigNode, _inherit: &Inherit) -> anyhow::Result<Kind> {
    let text = node
        .get("text")
        .and_then(ConfigNode::as_str)
        .ok_or_else(|| anyhow!("text: missing"))?;
    let max = node.get("max").and_then(ConfigNode::as_int).unwrap_or(0) as usize;
    Ok(Kind::Text(TextParticle::new(text, max)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_font::FixedFont;
    use core_tag::Tag;

    fn particle(template: &str, max: usize) -> Particle {
        let mut p = Particle::text(template, FixedFont::standard(), Color::rgba(255, 255, 255, 255));
        p.kind = Kind::Text(TextParticle::new(template, max));
        p
    }

    fn width_of(p: &Particle, tags: &TagSet) -> i32 {
        let mut e = p.instantiate(tags);
        e.begin_expose()
    }

    #[test]
    fn width_is_advance_sum_plus_margins() {
        let mut p = particle("abc", 0);
        p.left_margin = 3;
        p.right_margin = 5;
        // Three narrow cells of 8px each.
        assert_eq!(width_of(&p, &TagSet::empty()), 3 + 24 + 5);
    }

    #[test]
    fn template_expansion_feeds_the_shaper() {
        let p = particle("{time}", 0);
        let tags = TagSet::new(vec![Tag::new_string("time", "12:34")]);
        assert_eq!(width_of(&p, &tags), 5 * 8);
    }

    #[test]
    fn truncation_adds_dots_when_room() {
        assert_eq!(truncate("abcdefgh".into(), 6), "abc...");
        assert_eq!(truncate("abcdefgh".into(), 4), "a...");
        assert_eq!(truncate("abc".into(), 6), "abc");
    }

    #[test]
    fn tight_truncation_cuts_plainly() {
        assert_eq!(truncate("abcdefgh".into(), 3), "abc");
        assert_eq!(truncate("abcdefgh".into(), 1), "a");
    }

    #[test]
    fn truncation_respects_scalar_boundaries() {
        // Multi-byte scalars; counts are in chars, not bytes.
        assert_eq!(truncate("ééééééé".into(), 5), "éé...");
        assert_eq!(truncate("日本語テキスト".into(), 3), "日本語");
    }

    #[test]
    fn identical_text_reuses_one_cache_entry() {
        let text = TextParticle::new("{t}", 0);
        let p = particle("", 0);
        let tags = TagSet::new(vec![Tag::new_string("t", "steady")]);

        // Two consecutive frames: instantiate, size, drop.
        for _ in 0..2 {
            let mut content_particle = Particle::text("x", p.font.clone(), p.foreground);
            content_particle.kind = Kind::Text(TextParticle {
                template: text.template.clone(),
                max_len: 0,
                cache: text.cache.clone(),
            });
            let mut e = content_particle.instantiate(&tags);
            e.begin_expose();
            drop(e);
        }

        assert_eq!(text.cache_entries(), 1);
    }

    #[test]
    fn changing_text_reuses_released_slots() {
        let tp = TextParticle::new("{n}", 0);
        let font = FixedFont::standard();
        let fg = Color::rgba(255, 255, 255, 255);

        for n in 0..5 {
            let mut p = Particle::text("x", font.clone(), fg);
            p.kind = Kind::Text(TextParticle {
                template: tp.template.clone(),
                max_len: 0,
                cache: tp.cache.clone(),
            });
            let tags = TagSet::new(vec![Tag::new_int("n", n)]);
            let mut e = p.instantiate(&tags);
            e.begin_expose();
            drop(e); // releases the slot before the next frame
        }

        // Every frame re-used the single released slot.
        assert_eq!(tp.cache_entries(), 1);
    }

    #[test]
    fn concurrent_exposables_occupy_distinct_slots() {
        let tp = TextParticle::new("{n}", 0);
        let font = FixedFont::standard();
        let fg = Color::rgba(255, 255, 255, 255);

        let mut held = Vec::new();
        for n in 0..3 {
            let mut p = Particle::text("x", font.clone(), fg);
            p.kind = Kind::Text(TextParticle {
                template: tp.template.clone(),
                max_len: 0,
                cache: tp.cache.clone(),
            });
            let tags = TagSet::new(vec![Tag::new_int("n", n)]);
            let mut e = p.instantiate(&tags);
            e.begin_expose();
            held.push(e);
        }

        assert_eq!(tp.cache_entries(), 3);
    }
}
