//! 索引模型：表/索引定义、键编码、变更生成与行比对

pub mod compare;
pub mod keys;
pub mod mutation;
pub mod schema;

pub use compare::{CompareContext, ErrorType, Outcome, RowComparator, Verdict};
pub use mutation::MutationGenerator;
pub use schema::{Catalog, IndexState, ResolvedIndex, ResolvedTable, SchemaError};
