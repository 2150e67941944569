//! Pull-based event stream primitives.
//!
//! Every stage of the exchange pipeline is expressed over `Source<T>`, a
//! lazy, multi-subscribe-by-fresh-execution producer. This module has no
//! notion of GraphQL; it is the same kind of small reactive-streams core
//! that backs the rest of this crate's pipeline, independent of what flows
//! through it.

mod core;
mod operators;
mod sink;
mod sources;

pub use core::Sink;
pub use core::Source;
pub use core::Subscription;
pub use operators::SourceExt;
pub use operators::catch_error;
pub use operators::delay;
pub use operators::filter;
pub use operators::map;
pub use operators::merge;
pub use operators::merge_map;
pub use operators::share;
pub use operators::switch_map;
pub use operators::tap;
pub use operators::take;
pub use operators::take_until;
pub use sink::Observer as SinkObserver;
pub use sink::collect;
pub use sink::collect_all;
pub use sink::peek;
pub use sink::subscribe;
pub use sources::Observer as MakeObserver;
pub use sources::Subject;
pub use sources::empty;
pub use sources::from_array;
pub use sources::from_future;
pub use sources::from_subscription;
pub use sources::from_value;
pub use sources::make;
pub use sources::make_subject;
