//! kite-core
//!
//! Fire-and-forget dispatch, weak event subscriptions and type-checked async
//! commands for UI-facing code.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, failure, errors）
//! - **dispatch**: fire-and-forget 実行と例外ハンドラのルーティング
//! - **events**: 購読者を弱参照で持つイベント登録簿
//! - **command**: 引数の型を検証する非同期コマンド
//! - **observability**: tracing 初期化と dispatcher のカウンタ

pub mod command;
pub mod dispatch;
pub mod domain;
pub mod events;
pub mod observability;

pub use self::command::{AsyncCommand, AsyncExecute, AsyncValueCommand, Command};
pub use self::dispatch::{Dispatcher, FireAndForget, LaunchHandle, LaunchOptions};
pub use self::domain::{Failure, KiteError, KiteResult};
pub use self::events::{EventHandler, WeakEventManager};
