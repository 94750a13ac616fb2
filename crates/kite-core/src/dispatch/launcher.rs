//! Dispatcher - fire-and-forget の本体
//!
//! # フロー
//! 1. 実行先の runtime を決める（worker / 呼び出し元）。どちらもなければ `NoRuntime`
//! 2. オペレーションを tokio task として spawn（呼び出し元は待たない）
//! 3. task の中で完了を待ち、panic も `Failure` に変換する
//! 4. 失敗なら global handler → call-site handler の順に通知
//! 5. `observe_only` でなければ `LaunchHandle` 経由で失敗を返す
//! 6. 誰も観測せず `always_rethrow` ならプロセスを abort
//!
//! 呼び出し元のスレッドで失敗が再送出されることはありません。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use super::options::LaunchOptions;
use super::registry::{ExceptionHandler, ExceptionRegistry};
use crate::domain::{Failure, KiteError, KiteResult, LaunchId};
use crate::observability::{DispatchCounters, DispatchCounts};

/// Launches operations detached from their caller.
///
/// Cheap to clone; clones share the registry and the counters.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ExceptionRegistry>,
    worker: Option<Handle>,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ExceptionRegistry>) -> Self {
        Self {
            registry,
            worker: None,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Dispatcher bound to [`ExceptionRegistry::global`].
    pub fn global() -> &'static Dispatcher {
        static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();
        GLOBAL.get_or_init(|| Dispatcher::new(ExceptionRegistry::global()))
    }

    /// Run operations on `worker` unless a launch asks to stay on the
    /// caller's context. Also lets threads outside any runtime launch.
    pub fn with_worker(mut self, worker: Handle) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn registry(&self) -> &Arc<ExceptionRegistry> {
        &self.registry
    }

    pub fn counts(&self) -> DispatchCounts {
        self.counters.snapshot()
    }

    /// Launch `operation` without waiting for it.
    ///
    /// The returned handle may be dropped; the operation keeps running and
    /// its failure is still routed to the handlers.
    ///
    /// # Errors
    /// `NoRuntime` when called outside a tokio runtime and no worker runtime
    /// was configured. `operation` is dropped without running.
    pub fn launch<F, E>(
        &self,
        operation: F,
        on_exception: Option<ExceptionHandler>,
        options: LaunchOptions,
    ) -> KiteResult<LaunchHandle>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let target = self.spawn_target(options)?;
        let launch_id = LaunchId::generate();
        let registry = Arc::clone(&self.registry);
        let counters = Arc::clone(&self.counters);
        counters.launched();

        let task = async move {
            if options.force_yield {
                tokio::task::yield_now().await;
            }

            let failure = match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(Ok(())) => {
                    counters.succeeded();
                    tracing::trace!(%launch_id, "operation completed");
                    return Ok(());
                }
                Ok(Err(err)) => Failure::from_error(err),
                Err(payload) => Failure::from_panic(payload),
            };

            route_failure(
                &registry,
                on_exception.as_ref(),
                failure.with_launch_id(launch_id),
                launch_id,
                options,
                &counters,
            )
        };

        let join = target.spawn(task);
        tracing::trace!(%launch_id, "operation launched");

        Ok(LaunchHandle { launch_id, join })
    }

    /// Worker unless the launch keeps the captured context; either way the
    /// other one is the fallback.
    fn spawn_target(&self, options: LaunchOptions) -> KiteResult<Handle> {
        let current = Handle::try_current().ok();
        let preferred = if options.continue_on_captured_context {
            current.clone()
        } else {
            self.worker.clone()
        };
        preferred
            .or(current)
            .or_else(|| self.worker.clone())
            .ok_or(KiteError::NoRuntime)
    }
}

fn route_failure(
    registry: &ExceptionRegistry,
    on_exception: Option<&ExceptionHandler>,
    failure: Failure,
    launch_id: LaunchId,
    options: LaunchOptions,
    counters: &DispatchCounters,
) -> Result<(), Failure> {
    counters.failed();
    let policy = registry.policy();

    let mut observed = false;
    for handler in policy.default_handler.iter().chain(on_exception) {
        invoke_handler(handler, &failure);
        observed = true;
    }

    if observed {
        counters.observed();
    } else if policy.always_rethrow {
        escalate(&failure, launch_id);
    } else {
        tracing::debug!(%launch_id, error = %failure, "unobserved fire-and-forget failure dropped");
    }

    if options.observe_only {
        Ok(())
    } else {
        Err(failure)
    }
}

/// Unobserved failure under `always_rethrow`: log it, write it to stderr and
/// abort the process.
fn escalate(failure: &Failure, launch_id: LaunchId) -> ! {
    tracing::error!(%launch_id, error = %failure, "unobserved fire-and-forget failure, aborting");
    eprintln!("fatal: unobserved fire-and-forget failure in {launch_id}: {failure}");
    std::process::abort()
}

fn invoke_handler(handler: &ExceptionHandler, failure: &Failure) {
    // handler 自身の panic で worker を巻き込まない
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(failure)));
    if outcome.is_err() {
        tracing::error!(
            launch_id = ?failure.launch_id(),
            "exception handler panicked"
        );
    }
}

/// Completion channel of one launch.
///
/// Awaiting it is optional. It resolves to the operation's failure unless the
/// launch was `observe_only`.
#[derive(Debug)]
pub struct LaunchHandle {
    launch_id: LaunchId,
    join: JoinHandle<Result<(), Failure>>,
}

impl LaunchHandle {
    pub fn launch_id(&self) -> LaunchId {
        self.launch_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Future for LaunchHandle {
    type Output = Result<(), Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) => Poll::Ready(Err(failure_from_join_error(err, this.launch_id))),
        }
    }
}

/// Only reachable when the runtime shuts down under the task.
fn failure_from_join_error(err: JoinError, launch_id: LaunchId) -> Failure {
    let failure = if err.is_panic() {
        Failure::from_panic(err.into_panic())
    } else {
        Failure::from_error(anyhow::anyhow!("{launch_id} was cancelled"))
    };
    failure.with_launch_id(launch_id)
}

/// Launch on the global dispatcher.
pub fn launch<F, E>(
    operation: F,
    on_exception: Option<ExceptionHandler>,
    options: LaunchOptions,
) -> KiteResult<LaunchHandle>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    Dispatcher::global().launch(operation, on_exception, options)
}
