use diesel::connection::Instrumentation;
use diesel::connection::InstrumentationEvent;
use tracing::Span;

/// Emits a `tracing` span per query and per transaction
///
/// Spans are opened on `Start*`/`Begin*` events and closed on the matching
/// `Finish*`/`Commit*`/`Rollback*` event.
#[derive(Debug, Default)]
pub(super) struct TracingInstrumentation {
    query_span: Option<Span>,
    transaction_spans: Vec<Span>,
}

impl Instrumentation for TracingInstrumentation {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { query, .. } => {
                let span = tracing::debug_span!(
                    "SQL query",
                    db.system = "postgresql",
                    db.statement = %query,
                    otel.kind = "client",
                );
                self.query_span = Some(span);
            }
            InstrumentationEvent::FinishQuery { error, .. } => {
                if let Some(span) = self.query_span.take() {
                    let _entered = span.enter();
                    match error {
                        Some(error) => tracing::debug!(%error, "query failed"),
                        None => tracing::trace!("query succeeded"),
                    }
                }
            }
            InstrumentationEvent::BeginTransaction { depth, .. } => {
                self.transaction_spans.push(tracing::debug_span!(
                    "SQL transaction",
                    depth = depth.get()
                ));
            }
            InstrumentationEvent::CommitTransaction { depth, .. } => {
                tracing::trace!(depth = depth.get(), "transaction committed");
                self.transaction_spans.pop();
            }
            InstrumentationEvent::RollbackTransaction { depth, .. } => {
                tracing::debug!(depth = depth.get(), "transaction rolled back");
                self.transaction_spans.pop();
            }
            _ => {}
        }
    }
}
