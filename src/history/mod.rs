//! 历史层：步骤与分支历史树

pub mod step;
pub mod tree;

pub use step::{Step, StepId, TransformationDescriptor, TransformationSource};
pub use tree::{HistoryTree, TreeError};
