use std::{sync::Once, time::Instant};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        format::{FmtSpan, Writer},
        time::{FormatTime, SystemTime},
    },
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingConsumer {
    Test,
    Tool,
}

/// Initialize tracing. If no `process_id` is specified one will be randomly
/// generated. Only the first call in a process has any effect.
pub fn tracing_init(consumer: TracingConsumer, process_id: Option<String>) {
    let testing = consumer == TracingConsumer::Test;
    let color = !std::env::var("NO_COLOR").is_ok_and(|s| !s.is_empty());

    static INIT: Once = Once::new();
    INIT.call_once(move || {
        let mut filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy();

        if testing {
            for directive in ["nrtdir=trace", "nrtdir_test=trace"] {
                if let Ok(directive) = directive.parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }

        // tests running in parallel processes are easier to untangle with a prefix
        let prefix = testing.then(|| {
            process_id
                .unwrap_or_else(|| bs58::encode(rand::random::<u64>().to_le_bytes()).into_string())
        });

        let time = if testing {
            TimeFormat::Offset { start: Instant::now() }
        } else {
            TimeFormat::Long(SystemTime)
        };

        let result = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(color)
            .with_test_writer()
            .with_timer(TimeAndPrefix { prefix, time })
            .finish()
            .try_init();

        if let Err(err) = result {
            eprintln!("failed to setup tracing subscriber: {err}");
        }
    });
}

enum TimeFormat {
    Long(SystemTime),
    Offset { start: Instant },
}

struct TimeAndPrefix {
    prefix: Option<String>,
    time: TimeFormat,
}

impl TimeAndPrefix {
    fn write_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        match self.time {
            TimeFormat::Long(inner) => inner.format_time(w),
            TimeFormat::Offset { start } => {
                let e = start.elapsed();
                write!(w, "{:03}.{:03}s", e.as_secs(), e.subsec_millis())
            }
        }
    }
}

impl FormatTime for TimeAndPrefix {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(w, "{prefix} ")?;
        }
        self.write_time(w)
    }
}
