use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::{future::BoxFuture, FutureExt};

/// Completion callback attached to a transfer.
///
/// Cloning is cheap; both variants share the underlying function. Invocation
/// is isolated: a panicking callback is logged and swallowed so it cannot
/// take a worker down with it.
pub enum DriveCallback<T: Send + Sync + 'static> {
    Fn(Arc<dyn Fn(T) + Send + Sync>),
    AsyncFn(Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>),
}

impl<T: Send + Sync + 'static> DriveCallback<T> {
    /// Construct callback from function
    pub fn from_fn<F>(fun: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        DriveCallback::Fn(Arc::new(fun))
    }

    /// Construct callback from async function
    pub fn from_async_fn<F, R>(fun: F) -> Self
    where
        F: Fn(T) -> R + Send + Sync + 'static,
        R: Future<Output = ()> + Send + 'static,
    {
        DriveCallback::AsyncFn(Arc::new(move |value| fun(value).boxed()))
    }

    pub async fn invoke(&self, value: T) {
        match self {
            Self::Fn(fun) => {
                let fun = fun.clone();
                if std::panic::catch_unwind(AssertUnwindSafe(|| fun(value))).is_err() {
                    tracing::warn!("completion callback panicked");
                }
            }
            Self::AsyncFn(fun) => {
                if tokio::spawn(fun(value)).await.is_err() {
                    tracing::warn!("completion callback panicked");
                }
            }
        }
    }
}

impl<T: Send + Sync + 'static> Clone for DriveCallback<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Fn(fun) => Self::Fn(fun.clone()),
            Self::AsyncFn(fun) => Self::AsyncFn(fun.clone()),
        }
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for DriveCallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fn(_) => f.write_str("DriveCallback::Fn"),
            Self::AsyncFn(_) => f.write_str("DriveCallback::AsyncFn"),
        }
    }
}
