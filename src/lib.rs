//! # QuarryDB Query Compilation & Aggregation Core
//!
//! The core of a sharded relational database server: the translator that
//! lowers optimizer plan trees into execution trees, and the aggregation
//! engine that folds tuple streams into accumulator results.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Optimizer Plan + Term Environment
//!     ↓
//! [Predicate Factory]     → ordered pointer-predicate lists
//!     ↓
//! [Index Info Builder]    → key-range expressions in index order
//!     ↓
//! [Node Builders]         → scan/list-file execution skeletons
//!     ↓
//! [Outer/Inner Generator] → composed execution tree
//!     ↓
//! [Multi-Range Analyzer / Key-Limit Extractor] → key-limit annotations
//!     ↓
//! Execution Tree (XASL)
//!     ↓ (per produced row)
//! [Aggregation Engine]    → accumulators, DISTINCT spill, finalize
//!     ↓
//! [Tuple Copy-Out]        → result tuples / list files
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Runtime values, domains, coercion, collations |
//! | `bitset` | Dense id sets over the planner's id spaces |
//! | `env` | Term/segment/node/subquery environment |
//! | `expr` | Shared expression arena and limit registers |
//! | `plan` | Optimizer plan tree and select context |
//! | `xasl` | Execution-node model and chain maintenance |
//! | `translate` | Plan-to-execution-tree translation |
//! | `aggregate` | Accumulator engine and index-only fast path |
//! | `listfile` | Disk-backed spill files (sort/distinct/temp) |
//! | `tuple` | Value-list-to-tuple serialization |
//! | `session` | Session context, interrupt flag |
//! | `config` | Layered configuration (files + env) |
//! | `shard` | Shard catalog bookkeeping |
//! | `rebalance` | Migration row-copy driver |
//! | `client` | Client credential surface |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use quarrydb::aggregate::{
//!     evaluate_aggregate_list, finalize_aggregate_list, initialize_aggregate_list,
//!     AggregateFunction, AggregateSpec,
//! };
//! use quarrydb::regu::{ReguVar, ValueDescriptor};
//! use quarrydb::session::SessionContext;
//! use quarrydb::value::DbValue;
//!
//! let session = SessionContext::default();
//! let mut aggs = vec![AggregateSpec::new(
//!     AggregateFunction::Sum,
//!     ReguVar::Position(0),
//! )];
//!
//! initialize_aggregate_list(&session, &mut aggs)?;
//! let mut vd = ValueDescriptor::new(vec![DbValue::Null]);
//! for v in [1, 2, 3] {
//!     vd.set(0, DbValue::Int(v));
//!     evaluate_aggregate_list(&session, &mut aggs, &vd)?;
//! }
//! finalize_aggregate_list(&session, &mut aggs, Some(&vd), false)?;
//! assert_eq!(aggs[0].accumulator.value, DbValue::Bigint(6));
//! # Ok::<(), quarrydb::error::EngineError>(())
//! ```

// Value type system and dense id sets
pub mod bitset;
pub mod value;

// Planner output model
pub mod env;
pub mod expr;
pub mod plan;

// Execution tree model and translation
pub mod translate;
pub mod xasl;

// Runtime: registers, aggregation, spill files, tuple serialization
pub mod aggregate;
pub mod listfile;
pub mod regu;
pub mod tuple;

// Ambient concerns
pub mod config;
pub mod error;
pub mod session;

// Shard/migration collaborators
pub mod client;
pub mod rebalance;
pub mod shard;

// Re-export the types most callers need.
pub use bitset::BitSet;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use session::{InterruptHandle, SessionContext};
pub use translate::{PlanSummary, Translator};
pub use value::{DataType, DbValue, Domain};
