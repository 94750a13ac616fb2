//! Domain model (ids, failures, errors).

pub mod errors;
pub mod failure;
pub mod ids;

pub use self::errors::{KiteError, KiteResult};
pub use self::failure::{Failure, FailureKind};
pub use self::ids::{ChangeSubscriptionId, Id, IdMarker, LaunchId};
