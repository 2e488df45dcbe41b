use crate::{BridgeError, QueryEvents, Record};

/// The single capability every strategy handler exposes (spec section 9):
/// translate a batch of records into the `QueryEvents` that implement them.
///
/// Handlers are pure functions of their inputs and the handler's own
/// immutable configuration — no shared mutable state, no I/O. This is why the
/// trait is synchronous, unlike the teacher pipeline's `async_trait`-based
/// `Source`/`Transform`/`Sink`: those operators are I/O-bound stream stages,
/// handlers here are not.
pub trait Handler: Send + Sync {
    /// Translate records into query events. Records that the strategy's
    /// contract silently drops (for example CDC-Schema events lacking a
    /// qualifying constraint) are simply absent from the result, not errors
    /// — see spec section 7.
    fn handle(&self, records: &[Record]) -> Result<Vec<QueryEvents>, BridgeError>;
}
