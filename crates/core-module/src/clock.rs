//! Wall-clock module: exposes `time` and `date` tags.
//!
//! The worker aligns its wakeups to the next second or minute boundary,
//! depending on whether the time format can display seconds at all, so a
//! minutes-only clock wakes 60 times less often for the same output.

use anyhow::anyhow;
use chrono::{DateTime, Local, Utc};
use core_config::{verify, Attr, ConfigNode, Inherit, Keychain, VerifyResult};
use core_particle::{Exposable, Particle};
use core_tag::{Tag, TagSet};
use std::time::Duration;

use crate::{Module, ModuleContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    Seconds,
    Minutes,
}

struct ClockModule {
    content: Particle,
    date_format: String,
    time_format: String,
    utc: bool,
    granularity: Granularity,
}

/// Formatters whose output changes every second.
const SECONDS_FORMATTERS: &[&str] = &["%c", "%s", "%S", "%T", "%r", "%X"];

fn detect_granularity(time_format: &str) -> Granularity {
    if SECONDS_FORMATTERS.iter().any(|f| time_format.contains(f)) {
        Granularity::Seconds
    } else {
        Granularity::Minutes
    }
}

impl ClockModule {
    fn tags(&self) -> TagSet {
        let (time, date) = if self.utc {
            let now: DateTime<Utc> = Utc::now();
            (
                now.format(&self.time_format).to_string(),
                now.format(&self.date_format).to_string(),
            )
        } else {
            let now: DateTime<Local> = Local::now();
            (
                now.format(&self.time_format).to_string(),
                now.format(&self.date_format).to_string(),
            )
        };

        TagSet::new(vec![
            Tag::new_string("time", time),
            Tag::new_string("date", date),
        ])
    }

    /// Time until the next boundary the display can distinguish, plus a
    /// millisecond for rounding.
    fn next_wakeup(&self) -> Duration {
        let now = Local::now();
        let subsec_ms = now.timestamp_subsec_millis() as u64;
        let ms = match self.granularity {
            Granularity::Seconds => 1_000 - subsec_ms.min(999),
            Granularity::Minutes => {
                let into_minute =
                    (chrono::Timelike::second(&now) as u64) * 1_000 + subsec_ms;
                60_000 - into_minute.min(59_999)
            }
        };
        Duration::from_millis(ms + 1)
    }
}

impl Module for ClockModule {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn run(&self, ctx: &ModuleContext) -> i32 {
        ctx.bar.refresh();

        loop {
            if ctx.abort.wait_timeout(self.next_wakeup()) {
                return 0;
            }
            ctx.bar.refresh();
        }
    }

    fn content(&self) -> Exposable {
        self.content.instantiate(&self.tags())
    }
}

pub(crate) fn verify_conf(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    verify::dict(
        chain,
        node,
        &[
            Attr::required("content", content_check),
            Attr::optional("date-format", verify::string),
            Attr::optional("time-format", verify::string),
            Attr::optional("utc", verify::boolean),
        ],
    )
}

fn content_check(chain: &mut Keychain, node: &ConfigNode) -> VerifyResult {
    core_particle::verify_particle(chain, node)
}

pub(crate) fn from_conf(node: &ConfigNode, inherit: &Inherit) -> anyhow::Result<Box<dyn Module>> {
    let content = node.get("content").ok_or_else(|| anyhow!("content: missing"))?;
    let time_format = node
        .get("time-format")
        .and_then(ConfigNode::as_str)
        .unwrap_or("%H:%M")
        .to_owned();
    let date_format = node
        .get("date-format")
        .and_then(ConfigNode::as_str)
        .unwrap_or("%x")
        .to_owned();
    let utc = node.get("utc").and_then(ConfigNode::as_bool).unwrap_or(false);

    let granularity = detect_granularity(&time_format);
    tracing::debug!(
        target: "module.clock",
        time_format = %time_format,
        granularity = ?granularity,
        "configured"
    );

    Ok(Box::new(ClockModule {
        content: core_particle::conf_to_particle(content, inherit)?,
        date_format,
        time_format,
        utc,
        granularity,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_formatters_force_second_granularity() {
        for fmt in ["%H:%M:%S", "%T", "%r", "%X", "%c", "since %s"] {
            assert_eq!(detect_granularity(fmt), Granularity::Seconds, "{fmt}");
        }
    }

    #[test]
    fn minute_formats_wake_per_minute() {
        for fmt in ["%H:%M", "%R", "%I:%M %p"] {
            assert_eq!(detect_granularity(fmt), Granularity::Minutes, "{fmt}");
        }
    }

    fn clock(fmt: &str) -> ClockModule {
        let inherit = Inherit::new(
            std::sync::Arc::new(core_font::FixedFontProvider::default()),
            core_font::FixedFont::standard(),
        );
        ClockModule {
            content: core_particle::conf_to_particle(&ConfigNode::Str("{time}".into()), &inherit)
                .unwrap(),
            date_format: "%x".into(),
            time_format: fmt.into(),
            utc: false,
            granularity: detect_granularity(fmt),
        }
    }

    #[test]
    fn wakeup_is_within_one_period() {
        let seconds = clock("%T");
        assert!(seconds.next_wakeup() <= Duration::from_millis(1_001));

        let minutes = clock("%H:%M");
        assert!(minutes.next_wakeup() <= Duration::from_millis(60_001));
    }

    #[test]
    fn tags_expose_time_and_date() {
        let module = clock("%H:%M");
        let tags = module.tags();
        let time = tags.tag_for_name("time").unwrap().to_value_string();
        assert_eq!(time.len(), 5);
        assert!(time.contains(':'));
        assert!(tags.tag_for_name("date").is_some());
    }

    #[test]
    fn seconds_clock_refreshes_once_per_second() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[derive(Default)]
        struct CountingBar(AtomicUsize);

        impl crate::BarHandle for CountingBar {
            fn refresh(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn refresh_in(&self, _delay: Duration) {}
            fn set_cursor(&self, _name: &str) {}
        }

        let module = Arc::new(clock("%T"));
        let bar = Arc::new(CountingBar::default());
        let ctx = ModuleContext {
            abort: core_events::AbortSignal::new().unwrap(),
            bar: bar.clone(),
        };

        let abort = ctx.abort.clone();
        let worker = {
            let module = module.clone();
            std::thread::spawn(move || module.run(&ctx))
        };

        std::thread::sleep(Duration::from_millis(1_100));
        abort.raise();
        assert_eq!(worker.join().unwrap(), 0);

        // One initial refresh plus one per second boundary crossed; a
        // 1.1s window crosses one or two of them.
        let refreshes = bar.0.load(Ordering::SeqCst);
        assert!((2..=3).contains(&refreshes), "refreshes={refreshes}");
    }
}
