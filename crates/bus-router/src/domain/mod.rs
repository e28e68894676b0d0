//! # Domain Layer
//!
//! Routing tables owned by the router. Both are internally synchronized and
//! may be locked independently of the router's own state.

pub mod match_rule;
pub mod name_table;
pub mod rule_table;

pub use match_rule::MatchRule;
pub use name_table::{AliasDisposition, NameListener, NameTable};
pub use rule_table::RuleTable;
