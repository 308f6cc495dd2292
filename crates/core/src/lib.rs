pub mod analyzer;
pub mod codebase;
pub mod coding;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod interact;
pub mod logs;
pub mod orchestrator;
pub mod planner;
pub mod processor;
pub mod protoblock;
pub mod result;
pub mod source_tree;
pub mod trust;

pub use error::{CoreError, FailureKind};
pub use executor::{ExecutionOutcome, Executor};
pub use orchestrator::{Orchestrator, Recipe, RecipeSet};
pub use planner::Planner;
pub use processor::Processor;
pub use protoblock::{ProtoBlock, BRANCH_PREFIX};
pub use result::{Component, TrustResult};
pub use source_tree::{create_source_tree, SourceTree};
pub use trust::TrustRegistry;
