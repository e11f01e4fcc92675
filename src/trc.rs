//! Tracing configuration and initialization.

use std::io::IsTerminal as _;

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Environment variable holding the log filter. `RUST_LOG` is consulted when it is unset.
const LOG_ENV: &str = "COUNTFS_LOG";

/// `FORCE_COLOR` wins over `NO_COLOR`; otherwise color only when stderr is a terminal.
fn stderr_color() -> bool {
    let set = |var: &str| std::env::var_os(var).is_some_and(|v| !v.is_empty());
    set("FORCE_COLOR") || (std::io::stderr().is_terminal() && !set("NO_COLOR"))
}

enum TrcMode {
    /// Plain, verbose output with span close events.
    Ugly,
    /// Compact output routed through the indicatif progress layer.
    Pretty,
}

pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
}

impl Default for Trc {
    fn default() -> Self {
        let maybe_env_filter =
            EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            Ok(env_filter) => Self {
                // An explicit filter means someone is debugging; give them the raw stream.
                mode: TrcMode::Ugly,
                env_filter,
            },
            Err(_) => Self {
                mode: TrcMode::Pretty,
                env_filter: EnvFilter::new("info"),
            },
        }
    }
}

impl Trc {
    pub fn init(self) -> Result<(), TryInitError> {
        match self.mode {
            TrcMode::Ugly => self.init_ugly_mode(),
            TrcMode::Pretty => self.init_pretty_mode(),
        }
    }

    fn init_ugly_mode(self) -> Result<(), TryInitError> {
        // "Ugly mode" is the plain, verbose, rust logging mode.
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(stderr_color())
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    }

    fn init_pretty_mode(self) -> Result<(), TryInitError> {
        // "Pretty mode" is the compact, colorful mode.
        let indicatif_layer = IndicatifLayer::new();
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(indicatif_layer.get_stderr_writer())
                    .with_ansi(stderr_color())
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .with(indicatif_layer)
            .try_init()
    }
}
