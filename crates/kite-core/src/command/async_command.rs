//! AsyncCommand - 非同期オペレーションを `Command` として公開する
//!
//! # フロー
//! 1. `execute(parameter)` で引数を同期検証（型違いはここで `Err`）
//! 2. `is_executing` を立ててから `Dispatcher::launch` に渡す
//! 3. オペレーション完了（成功・失敗・panic いずれも）で `is_executing` を戻す
//!
//! 失敗は `on_exception` と global handler に流れ、`execute` の呼び出し元には
//! 戻りません。結果を待ちたい場合は [`AsyncExecute::execute_async`] を使います。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use super::capability::{AsyncExecute, Command};
use super::changed::CanExecuteChanged;
use super::parameter::{Parameter, ParameterSlot, TypeDescriptor};
use crate::dispatch::{Dispatcher, ExceptionHandler, LaunchHandle, LaunchOptions};
use crate::domain::{Failure, KiteResult};

type Operation<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type Predicate<C> = Arc<dyn Fn(C) -> bool + Send + Sync>;

#[derive(Default)]
struct ExecutionState {
    executing: AtomicUsize,
    changed: CanExecuteChanged,
}

/// Command wrapping an async operation taking `T`; `C` is the parameter type
/// of the `can_execute` predicate.
pub struct AsyncCommand<T = (), C = T> {
    operation: Operation<T>,
    can_execute: Option<Predicate<C>>,
    execute_slot: ParameterSlot<T>,
    can_execute_slot: ParameterSlot<C>,
    on_exception: Option<ExceptionHandler>,
    options: LaunchOptions,
    allows_multiple_executions: bool,
    dispatcher: Dispatcher,
    state: Arc<ExecutionState>,
}

/// Same runtime shape as [`AsyncCommand`].
pub type AsyncValueCommand<T = (), C = T> = AsyncCommand<T, C>;

fn boxed_operation<T, F, Fut>(operation: F) -> Operation<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |value: T| operation(value).boxed())
}

impl AsyncCommand<(), ()> {
    /// Parameterless command with default settings.
    pub fn new<F, Fut>(operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::builder(operation).build()
    }

    pub fn builder<F, Fut>(operation: F) -> AsyncCommandBuilder<(), ()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        AsyncCommandBuilder::new(
            boxed_operation(move |()| operation()),
            ParameterSlot::ignored(),
            ParameterSlot::ignored(),
        )
    }
}

impl<T: Clone + Send + 'static> AsyncCommand<T, T> {
    pub fn with_parameter<F, Fut>(operation: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::builder_with_parameter(operation).build()
    }

    pub fn builder_with_parameter<F, Fut>(operation: F) -> AsyncCommandBuilder<T, T>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        AsyncCommandBuilder::new(
            boxed_operation(operation),
            ParameterSlot::required(),
            ParameterSlot::required(),
        )
    }
}

impl<U: Clone + Send + 'static> AsyncCommand<Option<U>, Option<U>> {
    /// Command whose parameter may be absent.
    pub fn builder_nullable<F, Fut>(operation: F) -> AsyncCommandBuilder<Option<U>, Option<U>>
    where
        F: Fn(Option<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        AsyncCommandBuilder::new(
            boxed_operation(operation),
            ParameterSlot::nullable(),
            ParameterSlot::nullable(),
        )
    }
}

impl<T: Send + 'static, C: 'static> AsyncCommand<T, C> {
    /// Validate `parameter` and launch the operation, returning its handle.
    ///
    /// # Errors
    /// `ParameterTypeMismatch` on a bad parameter, `NoRuntime` when the
    /// dispatcher has nowhere to spawn. The operation does not run in either
    /// case.
    pub fn execute_with_handle(&self, parameter: Option<&dyn Parameter>) -> KiteResult<LaunchHandle> {
        let value = self.execute_slot.extract(parameter)?;
        let guard = self.begin_execution();
        let operation = Arc::clone(&self.operation);

        let handle = self.dispatcher.launch(
            async move {
                let _guard = guard;
                operation(value).await
            },
            self.on_exception.clone(),
            self.options,
        )?;
        tracing::trace!(launch_id = %handle.launch_id(), "command launched");
        Ok(handle)
    }

    pub fn is_executing(&self) -> bool {
        self.state.executing.load(Ordering::SeqCst) > 0
    }

    pub fn allows_multiple_executions(&self) -> bool {
        self.allows_multiple_executions
    }

    pub fn parameter_type(&self) -> TypeDescriptor {
        self.execute_slot.descriptor()
    }

    fn begin_execution(&self) -> ExecutingGuard {
        let previous = self.state.executing.fetch_add(1, Ordering::SeqCst);
        let notify = !self.allows_multiple_executions;
        if notify && previous == 0 {
            self.state.changed.raise();
        }
        ExecutingGuard {
            state: Arc::clone(&self.state),
            notify,
        }
    }
}

/// Clears the executing flag when the operation finishes, unwinding included.
struct ExecutingGuard {
    state: Arc<ExecutionState>,
    notify: bool,
}

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        let previous = self.state.executing.fetch_sub(1, Ordering::SeqCst);
        if self.notify && previous == 1 {
            self.state.changed.raise();
        }
    }
}

impl<T: Send + 'static, C: 'static> Command for AsyncCommand<T, C> {
    fn can_execute(&self, parameter: Option<&dyn Parameter>) -> KiteResult<bool> {
        let value = self.can_execute_slot.extract(parameter)?;
        if !self.allows_multiple_executions && self.is_executing() {
            return Ok(false);
        }
        Ok(self
            .can_execute
            .as_ref()
            .is_none_or(|predicate| predicate(value)))
    }

    fn execute(&self, parameter: Option<&dyn Parameter>) -> KiteResult<()> {
        self.execute_with_handle(parameter).map(drop)
    }

    fn can_execute_changed(&self) -> &CanExecuteChanged {
        &self.state.changed
    }
}

#[async_trait]
impl<T: Send + 'static, C: 'static> AsyncExecute<T> for AsyncCommand<T, C> {
    async fn execute_async(&self, parameter: T) -> Result<(), Failure> {
        let _guard = self.begin_execution();
        match AssertUnwindSafe((self.operation)(parameter))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Failure::from_error(err)),
            Err(payload) => Err(Failure::from_panic(payload)),
        }
    }
}

/// Builder for [`AsyncCommand`].
pub struct AsyncCommandBuilder<T, C> {
    operation: Operation<T>,
    execute_slot: ParameterSlot<T>,
    can_execute_slot: ParameterSlot<C>,
    can_execute: Option<Predicate<C>>,
    on_exception: Option<ExceptionHandler>,
    options: LaunchOptions,
    allows_multiple_executions: bool,
    dispatcher: Option<Dispatcher>,
}

impl<T, C> AsyncCommandBuilder<T, C> {
    fn new(
        operation: Operation<T>,
        execute_slot: ParameterSlot<T>,
        can_execute_slot: ParameterSlot<C>,
    ) -> Self {
        Self {
            operation,
            execute_slot,
            can_execute_slot,
            can_execute: None,
            on_exception: None,
            options: LaunchOptions::default(),
            allows_multiple_executions: true,
            dispatcher: None,
        }
    }

    pub fn can_execute<P>(mut self, predicate: P) -> Self
    where
        P: Fn(C) -> bool + Send + Sync + 'static,
    {
        self.can_execute = Some(Arc::new(predicate));
        self
    }

    /// Predicate that ignores the parameter.
    pub fn can_execute_if<P>(self, predicate: P) -> AsyncCommandBuilder<T, ()>
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.with_can_execute(ParameterSlot::ignored(), move |()| predicate())
    }

    /// Predicate over a parameter type distinct from the operation's.
    pub fn can_execute_with<C2, P>(self, predicate: P) -> AsyncCommandBuilder<T, C2>
    where
        C2: Clone + 'static,
        P: Fn(C2) -> bool + Send + Sync + 'static,
    {
        self.with_can_execute(ParameterSlot::required(), predicate)
    }

    pub fn can_execute_nullable<U2, P>(self, predicate: P) -> AsyncCommandBuilder<T, Option<U2>>
    where
        U2: Clone + 'static,
        P: Fn(Option<U2>) -> bool + Send + Sync + 'static,
    {
        self.with_can_execute(ParameterSlot::nullable(), predicate)
    }

    fn with_can_execute<C2, P>(self, slot: ParameterSlot<C2>, predicate: P) -> AsyncCommandBuilder<T, C2>
    where
        P: Fn(C2) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate<C2> = Arc::new(predicate);
        AsyncCommandBuilder {
            operation: self.operation,
            execute_slot: self.execute_slot,
            can_execute_slot: slot,
            can_execute: Some(predicate),
            on_exception: self.on_exception,
            options: self.options,
            allows_multiple_executions: self.allows_multiple_executions,
            dispatcher: self.dispatcher,
        }
    }

    pub fn on_exception<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Failure) + Send + Sync + 'static,
    {
        self.on_exception = Some(crate::dispatch::handler(handler));
        self
    }

    pub fn continue_on_captured_context(mut self, value: bool) -> Self {
        self.options = self.options.continue_on_captured_context(value);
        self
    }

    /// Replace all launch options at once.
    pub fn launch_options(mut self, options: LaunchOptions) -> Self {
        self.options = options;
        self
    }

    /// When `false`, `can_execute` reports `false` while an execution is in
    /// flight and capability-changed fires on start and finish.
    pub fn allows_multiple_executions(mut self, value: bool) -> Self {
        self.allows_multiple_executions = value;
        self
    }

    /// Launch through `dispatcher` instead of [`Dispatcher::global`].
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> AsyncCommand<T, C> {
        AsyncCommand {
            operation: self.operation,
            can_execute: self.can_execute,
            execute_slot: self.execute_slot,
            can_execute_slot: self.can_execute_slot,
            on_exception: self.on_exception,
            options: self.options,
            allows_multiple_executions: self.allows_multiple_executions,
            dispatcher: self
                .dispatcher
                .unwrap_or_else(|| Dispatcher::global().clone()),
            state: Arc::new(ExecutionState::default()),
        }
    }
}
