//! Identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + ジェネリック実装
//! launch ごと・購読ごとに ULID を払い出します。
//! Phantom type パターンで `LaunchId` と `ChangeSubscriptionId` を
//! コンパイル時に区別しつつ、実装は `Id<T>` ひとつにまとめています。
//!
//! ## ULID を使う理由
//! - **時刻でソート可能**: ログを launch 順に並べられる
//! - **調整なしで生成可能**: どのスレッドからでもロックなしで払い出せる

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"launch-", "sub-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のサイズは `Ulid` と同じです。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 新しい ID を払い出す
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Launch のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Launch {}

impl IdMarker for Launch {
    fn prefix() -> &'static str {
        "launch-"
    }
}

/// CanExecuteChanged 購読のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeSubscription {}

impl IdMarker for ChangeSubscription {
    fn prefix() -> &'static str {
        "sub-"
    }
}

/// Identifier of one fire-and-forget launch.
pub type LaunchId = Id<Launch>;

/// Token returned when subscribing to a command's capability-changed signal.
pub type ChangeSubscriptionId = Id<ChangeSubscription>;
