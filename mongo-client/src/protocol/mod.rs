//! Protocol operations executed over a single connection.
//!
//! Each operation encodes one request, writes it, reads the matching reply and
//! turns it into a typed result. [`GetMoreProtocol`] can also run on its own
//! task and report through a [`SingleResultCallback`].

mod command;
mod get_more;
mod kill_cursors;
mod query;
mod result;

pub use command::CommandProtocol;
pub(crate) use command::is_ok;
pub use get_more::GetMoreProtocol;
pub use kill_cursors::KillCursorsProtocol;
pub use query::QueryProtocol;
pub use result::{CommandResult, QueryResult};

use mongo_core::Result;

/// Receives the outcome of an asynchronous operation.
///
/// `on_result` consumes the callback, so it runs at most once; the operation
/// guarantees it runs exactly once with either a result or an error.
pub trait SingleResultCallback<T>: Send + 'static {
    /// Called with the outcome of the operation.
    fn on_result(self, result: Result<T>);
}

impl<T, F> SingleResultCallback<T> for F
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    fn on_result(self, result: Result<T>) {
        self(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongo_core::MongoError;
    use tokio::sync::oneshot;

    fn deliver<C: SingleResultCallback<i32>>(callback: C, result: Result<i32>) {
        callback.on_result(result);
    }

    #[test]
    fn test_closure_is_a_callback() {
        let (tx, mut rx) = oneshot::channel();
        deliver(move |result: Result<i32>| {
            let _ = tx.send(result);
        }, Ok(3));
        assert_eq!(rx.try_recv().unwrap().unwrap(), 3);
    }

    #[test]
    fn test_callback_receives_error() {
        let (tx, mut rx) = oneshot::channel();
        deliver(move |result: Result<i32>| {
            let _ = tx.send(result);
        }, Err(MongoError::Timeout("slow".to_string())));
        assert!(matches!(rx.try_recv().unwrap(), Err(MongoError::Timeout(_))));
    }
}
