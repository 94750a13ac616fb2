//! Errors - 同期エラーの分類
//!
//! 呼び出し元にその場で返すエラーだけをここに置きます。
//! dispatch されたオペレーションの失敗は `Failure` として handler に流れるので、
//! この enum には現れません。

use thiserror::Error;

pub type KiteResult<T> = Result<T, KiteError>;

/// KiteError は呼び出し地点で即座に返るエラー
///
/// - InvalidArgument: 空のイベント名、既に破棄された購読者など
/// - ParameterTypeMismatch: Command に渡された引数の実行時型が合わない
/// - Config: LaunchOptions などの設定が読めない
/// - NoRuntime: launch 先の tokio runtime がない（worker 未設定で runtime 外から呼んだ）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KiteError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("{}", mismatch_message(.expected, .actual))]
    ParameterTypeMismatch {
        expected: &'static str,
        actual: Option<&'static str>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no tokio runtime to launch on: call from inside a runtime or configure a worker handle")]
    NoRuntime,
}

impl KiteError {
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn missing_parameter(expected: &'static str) -> Self {
        Self::ParameterTypeMismatch {
            expected,
            actual: None,
        }
    }

    pub fn wrong_parameter(expected: &'static str, actual: &'static str) -> Self {
        Self::ParameterTypeMismatch {
            expected,
            actual: Some(actual),
        }
    }
}

fn mismatch_message(expected: &str, actual: &Option<&'static str>) -> String {
    match actual {
        Some(actual) => format!(
            "invalid command parameter: expected type `{expected}`, but parameter is type `{actual}`"
        ),
        None => format!("invalid command parameter: expected type `{expected}`, but parameter is absent"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_mentions_both_types() {
        let err = KiteError::wrong_parameter("i32", "&str");
        let msg = err.to_string();
        assert!(msg.contains("`i32`"));
        assert!(msg.contains("`&str`"));
    }

    #[test]
    fn missing_parameter_message_mentions_expected_only() {
        let msg = KiteError::missing_parameter("i32").to_string();
        assert!(msg.contains("`i32`"));
        assert!(msg.contains("absent"));
    }

    #[test]
    fn invalid_argument_names_the_argument() {
        let msg = KiteError::invalid_argument("event_name", "must not be empty").to_string();
        assert_eq!(msg, "invalid argument `event_name`: must not be empty");
    }
}
