//! Tracing subscriber setup for the relay process

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// WebRTC crates log every ICE and DTLS step; held at warn unless `RUST_LOG` says otherwise
const WEBRTC_TARGETS: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_dtls",
    "webrtc_sctp",
    "webrtc_srtp",
    "webrtc_mdns",
];

/// Install the global subscriber
///
/// `RUST_LOG` replaces the configured filter when set. Output goes to stdout
/// unless `file_path` is given, in which case the file is opened for append
/// and ANSI colouring is turned off.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_filter(&config.level)?;

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.format == "json" {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_target(true)
            .with_line_number(true)
            .with_file(false)
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;
    Ok(())
}

fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level {level:?}"))?;

    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(level_filter(level)),
    }
}

fn level_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::default().add_directive(LevelFilter::from_level(level).into());
    if level > Level::WARN {
        for target in WEBRTC_TARGETS {
            if let Ok(directive) = format!("{target}=warn").parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}
