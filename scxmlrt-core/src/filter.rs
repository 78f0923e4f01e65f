//! Embedder veto over external events.

use scxmlrt_model::Event;

/// Decides whether an external event reaches the statechart.
///
/// Called after the event leaves the external queue and before `_event` is
/// bound. Returning `false` discards the event without a trace in the
/// data model.
pub trait EventFilter: Send + Sync {
    fn handle(&self, event: &Event) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn handle(&self, event: &Event) -> bool {
        self(event)
    }
}
