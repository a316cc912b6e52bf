//! StoreSearch: the s-expression compiler, UDF registry, and query engine
//! (spec.md §3, §4.4).

pub mod ast;
pub mod compiler;
pub mod context;
pub mod engine;
pub mod udf;

pub use ast::{CmpKind, Expr, ThreadKind};
pub use context::{IndexKey, PendingOpKey, SearchContext, SearchRegistry};
pub use engine::StoreSearch;
