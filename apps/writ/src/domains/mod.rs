//! Reference domains used by the CLI demos and the scenario tests.

pub mod flags;
pub mod quota;

pub use flags::{CriticalFlagApproval, FeatureFlagState, FlagMutation, FlagOp};
pub use quota::{MaxQuota, PreventNegativeQuota, QuotaMutation, QuotaOp, QuotaState};
