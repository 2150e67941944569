//! The sentinel at the end of the chain. Every request that reaches it
//! means no transport exchange claimed it — a misconfigured client, not a
//! normal runtime condition — so it logs loudly and yields a single
//! terminal error rather than silently completing.

use crate::error::ExchangeError;
use crate::operation::Operation;
use crate::operation::OperationResult;
use crate::stream;
use crate::stream::Source;

use super::Exchange;
use super::Forward;

pub struct TerminalExchange;

impl TerminalExchange {
    pub fn new() -> Self {
        TerminalExchange
    }
}

impl Default for TerminalExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange for TerminalExchange {
    fn run(&self, operations: Source<Operation>, _forward: Forward) -> Source<OperationResult> {
        stream::merge_map(operations, |op| match op {
            Operation::Teardown { .. } => stream::empty(),
            Operation::Request { .. } => {
                tracing::warn!(key = op.key(), "operation reached the terminal exchange with no transport configured");
                stream::make(move |observer: stream::MakeObserver<OperationResult>| {
                    observer.error(ExchangeError::new("terminal", "No transport exchange configured"));
                    Box::new(|| {})
                })
            }
        })
    }
}
