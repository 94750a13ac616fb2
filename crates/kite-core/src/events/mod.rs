//! Events - 購読者を生かし続けないイベント登録簿
//!
//! - **handler**: `EventHandler`（購読者への弱参照 + コールバック）
//! - **manager**: `WeakEventManager`（イベント名 → 購読リスト）

pub mod handler;
pub mod manager;

pub use self::handler::EventHandler;
pub use self::manager::WeakEventManager;
