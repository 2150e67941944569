//! The exchange pipeline: a chain of bidirectional stages folded
//! right-to-left over `Source<Operation> -> Source<OperationResult>`, with
//! `share()` interposed on both sides of every link so multiple
//! subscribers to the composed pipeline never cause an exchange (or the
//! network request underneath it) to run more than once per operation.

mod cache_exchange;
mod dedup;
mod fragment;
mod http;
mod required;
mod retry;
mod scalar;
mod subscription_exchange;
mod terminal;

use std::rc::Rc;

use crate::operation::Operation;
use crate::operation::OperationResult;
use crate::stream::Source;

pub use cache_exchange::CacheExchange;
pub use dedup::DedupExchange;
pub use fragment::FragmentExchange;
pub use http::HttpExchange;
pub use http::HttpTransport;
pub use required::RequiredExchange;
pub use retry::RetryExchange;
pub use retry::RetryOptions;
pub use scalar::ScalarExchange;
pub use subscription_exchange::SubscriptionExchange;
pub use subscription_exchange::SubscriptionTransport;
pub use terminal::TerminalExchange;

/// What the next exchange downstream does with operations this one lets
/// through.
pub type Forward = Rc<dyn Fn(Source<Operation>) -> Source<OperationResult>>;

/// One stage of the pipeline. `operations` is this exchange's inbound
/// stream; `forward` hands whichever operations it doesn't fully handle
/// itself to the rest of the chain and returns their eventual results.
pub trait Exchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult>;
}

/// Folds `exchanges` right-to-left into a single `Forward`, wrapping both
/// the operation stream handed to each exchange and the result stream it
/// returns in `share()`. The caller is expected to include a terminal
/// exchange (see [`TerminalExchange`]) as the last element so nothing
/// falls through to the unreachable base case.
pub fn compose(exchanges: Vec<Rc<dyn Exchange>>) -> Forward {
    let mut forward: Forward = Rc::new(|_ops: Source<Operation>| crate::stream::empty());
    for exchange in exchanges.into_iter().rev() {
        let next = forward.clone();
        forward = Rc::new(move |ops: Source<Operation>| {
            let ops = crate::stream::share(ops);
            let results = exchange.run(ops, next.clone());
            crate::stream::share(results)
        });
    }
    forward
}
