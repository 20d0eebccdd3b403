//! Colored logging with component prefixes
//!
//! Every line carries a colored `[COMPONENT]` tag so output from the worker
//! process and one-shot CLI commands is easy to tell apart.

use owo_colors::{OwoColorize, Style};
use std::fmt;
use std::io;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{
    format::{FormatEvent, FormatFields, Writer},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;

/// Component identifier for prefixing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Startup, configuration and shutdown
    Main,
    /// Long-running worker process
    Worker,
    /// One-shot commands
    Cli,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Main => "MAIN",
            Component::Worker => "WORKER",
            Component::Cli => "CLI",
        }
    }

    pub fn color_style(&self) -> Style {
        match self {
            Component::Main => Style::new().cyan().bold(),
            Component::Worker => Style::new().green().bold(),
            Component::Cli => Style::new().blue().bold(),
        }
    }
}

/// Custom formatter with component prefixes and colors
pub struct ColoredFormatter {
    pub component: Component,
}

impl<S, N> FormatEvent<S, N> for ColoredFormatter
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
        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%H:%M:%S").dimmed())?;

        let prefix = format!("[{:6}]", self.component.as_str());
        write!(writer, "{} ", prefix.style(self.component.color_style()))?;

        match *event.metadata().level() {
            Level::ERROR => write!(writer, "{} ", "ERROR".red().bold())?,
            Level::WARN => write!(writer, "{} ", "WARN ".yellow().bold())?,
            Level::INFO => write!(writer, "{} ", "INFO ".green().bold())?,
            Level::DEBUG => write!(writer, "{} ", "DEBUG".blue().bold())?,
            Level::TRACE => write!(writer, "{} ", "TRACE".dimmed().bold())?,
        }

        // message plus structured fields such as task_id
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives apply on top of the default level (INFO, or DEBUG
/// when `verbose`). `plain` swaps the colored formatter for the compact one.
pub fn init_logger(component: Component, verbose: bool, plain: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if plain {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .compact()
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
        return Ok(());
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(ColoredFormatter { component })
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
