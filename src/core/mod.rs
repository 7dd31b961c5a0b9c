//! 核心层：错误类型与恢复动作

pub mod error;
pub mod recovery;

pub use error::{EngineError, RecoveryAction, RejectionReason};
pub use recovery::RecoveryEngine;
