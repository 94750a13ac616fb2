//! Dispatch - fire-and-forget 実行と例外ルーティング
//!
//! # 構成
//! - **registry**: プロセス共有の既定ハンドラと rethrow 設定
//! - **options**: launch ごとの設定（observe_only / force_yield / captured context）
//! - **launcher**: `Dispatcher` と `LaunchHandle`
//! - **ext**: `Future` 向けの拡張 trait

pub mod ext;
pub mod launcher;
pub mod options;
pub mod registry;

pub use self::ext::FireAndForget;
pub use self::launcher::{Dispatcher, LaunchHandle, launch};
pub use self::options::LaunchOptions;
pub use self::registry::{
    ExceptionHandler, ExceptionRegistry, handler, initialize, remove_default_exception_handling,
    reset, set_default_exception_handling, typed_handler,
};
