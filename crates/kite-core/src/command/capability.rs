//! Command traits - UI から見える「能力」インターフェース
//!
//! # 二層構造
//! - **表層（Dyn）**: `Command` - 引数は `Option<&dyn Parameter>`、object-safe
//! - **内部（Typed）**: `AsyncExecute<T>` - 型付きで直接 await できる

use async_trait::async_trait;

use super::changed::CanExecuteChanged;
use super::parameter::Parameter;
use crate::domain::{Failure, KiteResult};

/// Capability interface bound by UI code.
///
/// Both methods validate the parameter's runtime type first and return
/// `ParameterTypeMismatch` synchronously on a mismatch.
pub trait Command: Send + Sync {
    fn can_execute(&self, parameter: Option<&dyn Parameter>) -> KiteResult<bool>;

    /// Start the command without waiting for it.
    fn execute(&self, parameter: Option<&dyn Parameter>) -> KiteResult<()>;

    fn can_execute_changed(&self) -> &CanExecuteChanged;

    fn raise_can_execute_changed(&self) {
        self.can_execute_changed().raise();
    }
}

/// Typed, awaitable execution for callers that do want the result.
///
/// The failure comes back to the caller; exception handlers are not involved.
#[async_trait]
pub trait AsyncExecute<T: Send + 'static>: Send + Sync {
    async fn execute_async(&self, parameter: T) -> Result<(), Failure>;
}
