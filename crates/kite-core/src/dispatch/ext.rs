//! `fut.fire_and_forget(..)` sugar over [`Dispatcher::launch`].

use std::future::Future;

use super::launcher::{Dispatcher, LaunchHandle};
use super::options::LaunchOptions;
use super::registry::ExceptionHandler;
use crate::domain::KiteResult;

/// Extension methods for futures that resolve to `Result<(), E>`.
///
/// Like [`Dispatcher::launch`], these fail with `NoRuntime` only when there is
/// no runtime to spawn on.
///
/// # 使用例
/// ```ignore
/// refresh_feed().fire_and_forget(Some(handler(|f| tracing::warn!(%f, "refresh failed"))));
/// ```
pub trait FireAndForget<E>: Future<Output = Result<(), E>> + Send + Sized + 'static
where
    E: Into<anyhow::Error> + Send + 'static,
{
    fn fire_and_forget(self, on_exception: Option<ExceptionHandler>) -> KiteResult<LaunchHandle> {
        Dispatcher::global().launch(self, on_exception, LaunchOptions::default())
    }

    fn fire_and_forget_with(
        self,
        on_exception: Option<ExceptionHandler>,
        options: LaunchOptions,
    ) -> KiteResult<LaunchHandle> {
        Dispatcher::global().launch(self, on_exception, options)
    }

    fn fire_and_forget_on(
        self,
        dispatcher: &Dispatcher,
        on_exception: Option<ExceptionHandler>,
        options: LaunchOptions,
    ) -> KiteResult<LaunchHandle> {
        dispatcher.launch(self, on_exception, options)
    }
}

impl<F, E> FireAndForget<E> for F
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
}
