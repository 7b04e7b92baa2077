// obsp/src/logging.rs
use std::fmt;
use std::fs;
use std::io::IsTerminal;

use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "OBSP_LOG";
pub const LOG_DIR: &str = "/var/log/obsp";
const LOG_FILE: &str = "obsp.log";

pub fn glyph(level: Level) -> &'static str {
    if level == Level::INFO {
        "[+]"
    } else if level == Level::WARN {
        "[!]"
    } else if level == Level::ERROR {
        "[x]"
    } else {
        "[.]"
    }
}

/// One line per event: severity glyph, then the message and fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlyphFormat;

impl<S, N> FormatEvent<S, N> for GlyphFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        let mark = glyph(level);
        if writer.has_ansi_escapes() {
            let colored = if level == Level::INFO {
                mark.green().bold()
            } else if level == Level::WARN {
                mark.yellow().bold()
            } else if level == Level::ERROR {
                mark.red().bold()
            } else {
                mark.dimmed()
            };
            write!(writer, "{colored} ")?;
        } else {
            write!(writer, "{mark} ")?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber. The returned guard flushes the log file
/// and must outlive every log call.
pub fn init(verbose: u8) -> Option<WorkerGuard> {
    let level_filter = level_for(verbose);
    let env_filter = || {
        EnvFilter::builder()
            .with_default_directive(level_filter.into())
            .with_env_var(LOG_ENV)
            .from_env_lossy()
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .event_format(GlyphFormat)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    if verbose > 0 {
        match fs::create_dir_all(LOG_DIR) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(LOG_DIR, LOG_FILE);
                let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
                let file_layer = tracing_subscriber::fmt::layer()
                    .event_format(GlyphFormat)
                    .with_writer(non_blocking_appender)
                    .with_ansi(false);
                let _ = tracing_subscriber::registry()
                    .with(env_filter())
                    .with(stderr_layer)
                    .with(file_layer)
                    .try_init();
                debug!("Verbose logging enabled. Writing logs to: {LOG_DIR}/{LOG_FILE}");
                return Some(guard);
            }
            Err(e) => {
                eprintln!(
                    "{} Failed to create log directory {}: {} (logging to stderr only)",
                    "Warning:".yellow().bold(),
                    LOG_DIR,
                    e
                );
            }
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .try_init();
    None
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::{error, info, warn};
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn every_line_starts_with_its_glyph() {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(GlyphFormat)
            .with_writer(buffer.clone())
            .with_max_level(Level::TRACE)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            info!("Installing obs-gstreamer (zip)");
            warn!("Skipping obs-vaapi");
            error!("Installation of 'obs-studio' failed");
            debug!("Refreshing package index");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[+] Installing obs-gstreamer (zip)",
                "[!] Skipping obs-vaapi",
                "[x] Installation of 'obs-studio' failed",
                "[.] Refreshing package index",
            ]
        );
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), LevelFilter::INFO);
        assert_eq!(level_for(1), LevelFilter::DEBUG);
        assert_eq!(level_for(7), LevelFilter::TRACE);
        assert_eq!(glyph(Level::TRACE), "[.]");
    }
}
