//! Command - UI にバインドされる非同期コマンド
//!
//! - **parameter**: 型のない引数の検証と変換
//! - **changed**: capability-changed 通知
//! - **capability**: `Command` / `AsyncExecute` trait
//! - **async_command**: `AsyncCommand` とその builder

pub mod async_command;
pub mod capability;
pub mod changed;
pub mod parameter;

pub use self::async_command::{AsyncCommand, AsyncCommandBuilder, AsyncValueCommand};
pub use self::capability::{AsyncExecute, Command};
pub use self::changed::CanExecuteChanged;
pub use self::parameter::{Parameter, ParameterSlot, TypeDescriptor};
