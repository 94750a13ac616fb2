//! ExceptionRegistry - 既定の例外ハンドラと rethrow 設定
//!
//! # 設計
//! - プロセス全体で共有される可変状態（`ExceptionRegistry::global()`）
//! - 書き込みはすべて「値ごと置き換え」（マージしない、後勝ち）
//! - `reset()` で初期状態に戻す。テストはケースごとに必ず reset する
//! - 分離したい場合は `ExceptionRegistry::new()` で専用インスタンスを作り、
//!   `Dispatcher::new` に渡す

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::domain::Failure;

/// Callback that observes a failed fire-and-forget operation.
pub type ExceptionHandler = Arc<dyn Fn(&Failure) + Send + Sync>;

/// Wrap a closure as an [`ExceptionHandler`].
pub fn handler<F>(f: F) -> ExceptionHandler
where
    F: Fn(&Failure) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler that only fires when the underlying error is an `E`.
///
/// ```ignore
/// let on_io = typed_handler::<std::io::Error, _>(|err, _failure| eprintln!("io: {err}"));
/// ```
pub fn typed_handler<E, F>(f: F) -> ExceptionHandler
where
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    F: Fn(&E, &Failure) + Send + Sync + 'static,
{
    Arc::new(move |failure: &Failure| {
        if let Some(err) = failure.downcast_ref::<E>() {
            f(err, failure);
        }
    })
}

#[derive(Clone, Default)]
pub(crate) struct ExceptionPolicy {
    pub(crate) default_handler: Option<ExceptionHandler>,
    pub(crate) always_rethrow: bool,
}

/// Holder of the default exception handler and the rethrow switch.
pub struct ExceptionRegistry {
    policy: RwLock<ExceptionPolicy>,
}

impl ExceptionRegistry {
    pub fn new() -> Self {
        Self {
            policy: RwLock::new(ExceptionPolicy::default()),
        }
    }

    /// The process-wide registry used by [`crate::dispatch::launch`].
    pub fn global() -> Arc<ExceptionRegistry> {
        static GLOBAL: OnceLock<Arc<ExceptionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ExceptionRegistry::new())))
    }

    /// Configure whether a failure nobody observed aborts the process.
    pub fn initialize(&self, always_rethrow: bool) {
        self.write().always_rethrow = always_rethrow;
        tracing::debug!(always_rethrow, "exception registry initialized");
    }

    /// Replace the default handler (last writer wins).
    pub fn set_default_exception_handling(&self, handler: ExceptionHandler) {
        self.write().default_handler = Some(handler);
    }

    pub fn remove_default_exception_handling(&self) {
        self.write().default_handler = None;
    }

    /// Back to the pristine state: no handler, no escalation.
    pub fn reset(&self) {
        *self.write() = ExceptionPolicy::default();
    }

    pub fn has_default_handler(&self) -> bool {
        self.read().default_handler.is_some()
    }

    pub fn always_rethrow(&self) -> bool {
        self.read().always_rethrow
    }

    /// Handler and flag read under one lock so a concurrent writer can't
    /// produce a mixed view.
    pub(crate) fn policy(&self) -> ExceptionPolicy {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ExceptionPolicy> {
        self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ExceptionPolicy> {
        self.policy.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExceptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// グローバル registry 向けの関数
// ────────────────────────────────────────────────────────────────────────────

pub fn initialize(always_rethrow: bool) {
    ExceptionRegistry::global().initialize(always_rethrow);
}

pub fn set_default_exception_handling<F>(f: F)
where
    F: Fn(&Failure) + Send + Sync + 'static,
{
    ExceptionRegistry::global().set_default_exception_handling(handler(f));
}

pub fn remove_default_exception_handling() {
    ExceptionRegistry::global().remove_default_exception_handling();
}

pub fn reset() {
    ExceptionRegistry::global().reset();
}
