//! Rolling daily and monthly spend limits per tenant.
//!
//! Totals belong to a billing calendar day and month (computed in the
//! configured billing UTC offset) and roll over lazily on the next
//! evaluation. Manual blocks are never cleared by rollover.

mod enforcer;
mod limit;

pub use enforcer::CostLimitEnforcer;
pub use limit::{
    ActionOnLimit, AlertFlags, AlertKind, BlockCause, CostAlert, CostCheck, CostLimit,
    CostLimitPolicy, CostReservation, LimitPeriod, Rollover,
};
