//! Parameter - 型のない引数を型付きの値に変換する
//!
//! `Command` の入口は `Option<&dyn Parameter>`（何でも渡せる）ですが、
//! 包んでいるオペレーションは `T` を受け取ります。その橋渡しがここの仕事です。
//!
//! # 検証ルール
//! - 非 nullable で引数なし → `ParameterTypeMismatch { expected, actual: None }`
//! - 実行時型が違う → `ParameterTypeMismatch { expected, actual: Some(..) }`
//! - それ以外 → clone して `T` を返す
//!
//! 非同期の処理が始まる前に同期で返すので、呼び出し元でそのまま失敗が見えます。

use std::any::{Any, type_name};

use crate::domain::{KiteError, KiteResult};

/// Anything that can be handed to [`super::Command::execute`].
///
/// Implemented for every `'static` type; the point is to remember the
/// concrete type's name for diagnostics.
pub trait Parameter: Any {
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> Parameter for T {
    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Expected parameter type of one command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub nullable: bool,
}

type Extractor<T> = fn(Option<&dyn Parameter>) -> KiteResult<T>;

/// How a command turns its untyped parameter into `T`.
pub struct ParameterSlot<T> {
    descriptor: TypeDescriptor,
    extract: Extractor<T>,
}

impl<T> ParameterSlot<T> {
    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    pub fn extract(&self, parameter: Option<&dyn Parameter>) -> KiteResult<T> {
        (self.extract)(parameter)
    }
}

impl ParameterSlot<()> {
    /// Parameterless commands accept and discard whatever they are given.
    pub fn ignored() -> Self {
        Self {
            descriptor: TypeDescriptor {
                name: type_name::<()>(),
                nullable: true,
            },
            extract: |_| Ok(()),
        }
    }
}

impl<T: Clone + 'static> ParameterSlot<T> {
    pub fn required() -> Self {
        Self {
            descriptor: TypeDescriptor {
                name: type_name::<T>(),
                nullable: false,
            },
            extract: extract_required::<T>,
        }
    }
}

impl<U: Clone + 'static> ParameterSlot<Option<U>> {
    /// Accepts no parameter, a `U`, or an `Option<U>`.
    pub fn nullable() -> Self {
        Self {
            descriptor: TypeDescriptor {
                name: type_name::<Option<U>>(),
                nullable: true,
            },
            extract: extract_nullable::<U>,
        }
    }
}

impl<T> Clone for ParameterSlot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ParameterSlot<T> {}

fn extract_required<T: Clone + 'static>(parameter: Option<&dyn Parameter>) -> KiteResult<T> {
    let expected = type_name::<T>();
    let parameter = parameter.ok_or_else(|| KiteError::missing_parameter(expected))?;
    parameter
        .as_any()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| KiteError::wrong_parameter(expected, parameter.type_name()))
}

fn extract_nullable<U: Clone + 'static>(parameter: Option<&dyn Parameter>) -> KiteResult<Option<U>> {
    let Some(parameter) = parameter else {
        return Ok(None);
    };
    let any = parameter.as_any();
    if let Some(value) = any.downcast_ref::<U>() {
        return Ok(Some(value.clone()));
    }
    if let Some(value) = any.downcast_ref::<Option<U>>() {
        return Ok(value.clone());
    }
    Err(KiteError::wrong_parameter(
        type_name::<Option<U>>(),
        parameter.type_name(),
    ))
}
