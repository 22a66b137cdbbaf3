// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format for processes embedding the metrics core.
//!
//! The library only emits `tracing` events. A host that wants them tagged
//! like the rest of the agent output installs [`subscriber`] (or plugs
//! [`Formatter`] into its own builder):
//!
//! ```text
//! APM_METRICS | WARN | flush{cycle=3}: Transaction name limit reached dropped=2
//! ```

use std::fmt;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{FmtContext, FormattedFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_PREFIX: &str = "APM_METRICS";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl Formatter {
    /// Writes `name{fields}: ` for every span the event is nested in,
    /// outermost first.
    fn write_scope<S, N>(ctx: &FmtContext<'_, S, N>, writer: &mut Writer<'_>) -> fmt::Result
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        N: for<'a> FormatFields<'a> + 'static,
    {
        let Some(scope) = ctx.event_scope() else {
            return Ok(());
        };
        for span in scope.from_root() {
            let extensions = span.extensions();
            match extensions
                .get::<FormattedFields<N>>()
                .filter(|fields| !fields.is_empty())
            {
                Some(fields) => write!(writer, "{}{{{fields}}}: ", span.name())?,
                None => write!(writer, "{}: ", span.name())?,
            }
        }
        Ok(())
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
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
        write!(writer, "{LOG_PREFIX} | {} | ", event.metadata().level())?;
        Self::write_scope(ctx, &mut writer)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Plain-text subscriber writing [`Formatter`] lines at `level` and above.
pub fn subscriber<W>(level: Level, make_writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_ansi(false)
        .event_format(Formatter)
        .with_max_level(level)
        .with_writer(make_writer)
        .finish()
}

/// Installs [`subscriber`] writing to stdout as the process-wide default.
pub fn init(level: Level) -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(subscriber(level, std::io::stdout))
}
