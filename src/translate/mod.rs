//! # Plan-to-Execution-Tree Translator
//!
//! Lowers an optimizer plan tree into an execution tree: access specs on
//! scan leaves, predicates routed to the slot where they fire (key range,
//! key filter, data filter, if-pred, after-join, instance number),
//! subqueries installed on the correct chain, and key-limit annotations
//! derived for sort-limit and multi-range plans.
//!
//! ```text
//! (Plan, PlanEnv, SelectContext)
//!     ↓
//! [index_info]    → per-position key-range expressions
//!     ↓
//! [pred]          → ordered pointer-predicate lists
//!     ↓
//! [builders]      → execution-node skeletons + access specs
//!     ↓
//! [gen]           → recursive tree composition
//!     ↓
//! [multi_range] / [key_limit] → key-limit annotations
//! ```

mod builders;
mod gen;
mod index_info;
mod key_limit;
mod multi_range;
mod pred;

pub use gen::{PlanSummary, Translator};
pub use index_info::{index_scan_info, IndexScanInfo};
pub use key_limit::{
    key_limit_from_instnum, key_limit_from_ordbynum, orderby_upper_bound,
    pred_list_needs_scan_continue, pred_needs_scan_continue, Numbering,
};
pub use multi_range::{
    check_iscan_multi_range_opt, check_join_multi_range_opt, find_multi_range_subplan, Side,
};
pub use pred::{build_pred_list, if_pred_from_plan, instnum_pred_from_plan, split_scan_preds};
