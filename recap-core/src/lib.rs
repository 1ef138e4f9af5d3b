//! recap-core: receipt models, rule matching, tax allocation and transaction assembly

pub mod error;
pub mod matcher;
pub mod models;
pub mod money;
pub mod tax;
pub mod transaction;

pub use error::{AllocationError, MappingError, ParseError, ValidationError};
pub use matcher::{RuleMatcher, normalize_description};
pub use models::{
    FALLBACK_RULE_ID, FallbackMapping, MappingConfig, MappingDefaults, MappingRule, MatchSpec,
    MatchType, MatchedSubscription, ParsedReceipt, SplitLine, SubscriptionLine,
};
pub use money::{MILLIUNITS_PER_UNIT, format_milliunits, to_milliunits};
pub use tax::{allocate_proportional, build_split_lines};
pub use transaction::{
    CLEARED, RECEIPT_MEMO_PREFIX, SubTransaction, TransactionCandidate, assemble_transaction, receipt_memo, resolve_flag_color,
    validate_totals,
};
