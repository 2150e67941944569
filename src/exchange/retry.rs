//! Retries a failed operation with exponential backoff, folding every
//! intermediate attempt into a single result stream so callers only ever
//! see the eventual success or the final exhausted failure.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::operation::Operation;
use crate::operation::OperationKey;
use crate::operation::OperationMetadata;
use crate::operation::OperationResult;
use crate::operation::RetryMeta;
use crate::stream;
use crate::stream::Source;

use super::Exchange;
use super::Forward;

#[derive(Clone, Copy, Debug)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryOptions {
    fn backoff(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.saturating_mul(1u32 << attempt.min(31));
        scaled.min(self.max_delay)
    }
}

pub struct RetryExchange {
    options: RetryOptions,
}

impl RetryExchange {
    pub fn new(options: RetryOptions) -> Self {
        RetryExchange { options }
    }
}

/// Reads retryability off the transport-error channel, not the server's
/// GraphQL `errors` array: a response the server successfully returned,
/// even one carrying errors, was never a transport failure and is never
/// retried here.
fn is_retryable(result: &OperationResult) -> bool {
    result
        .transport_error
        .as_ref()
        .is_some_and(|err| err.status_code().is_some_and(|code| (500..600).contains(&code)))
}

impl Exchange for RetryExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        let retry_subject = stream::make_subject::<Operation>();
        let fed = stream::merge(vec![operations, retry_subject.source()]);
        let results = forward(fed);

        let options = self.options;
        let attempts: Rc<RefCell<HashMap<OperationKey, u32>>> = Rc::new(RefCell::new(HashMap::new()));

        stream::filter(results, move |result| {
            let key = result.operation.key();
            if !is_retryable(result) {
                attempts.borrow_mut().remove(&key);
                return true;
            }

            let attempt = attempts.borrow().get(&key).copied().unwrap_or(0);
            if attempt + 1 >= options.max_attempts {
                attempts.borrow_mut().remove(&key);
                return true;
            }

            let Operation::Request {
                artifact,
                variables,
                metadata,
                ..
            } = &result.operation
            else {
                return true;
            };

            let next_attempt = attempt + 1;
            attempts.borrow_mut().insert(key, next_attempt);
            let delay = options.backoff(attempt);
            tracing::debug!(key, attempt = next_attempt, delay_ms = delay.as_millis() as u64, "retrying after a retryable error");
            let retry_op = Operation::Request {
                key,
                artifact: artifact.clone(),
                variables: variables.clone(),
                metadata: OperationMetadata {
                    retry: Some(RetryMeta {
                        attempt: next_attempt,
                        delay_ms: delay.as_millis() as u64,
                    }),
                    ..metadata.clone()
                },
            };

            let subject = retry_subject.clone();
            tokio::task::spawn_local(async move {
                tokio::time::sleep(delay).await;
                subject.next(retry_op);
            });

            false
        })
    }
}
