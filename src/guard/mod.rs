//! Revenue guard: ordered admission checks before a wallet debit.
//!
//! | Layer | Refuses when |
//! |-------|--------------|
//! | subscription | tenant has no active subscription |
//! | plan_limit | action is outside the plan quota |
//! | anti_double | idempotency key reused with other parameters |
//! | cost_limit | daily or monthly spend limit reached |
//! | saldo | wallet missing, suspended or short |
//! | deduction | atomic debit rejected |
//!
//! A request whose idempotency key already produced a deduction is answered
//! with the original response and is never charged again.

mod collaborators;
mod pipeline;
mod request;

pub use collaborators::{
    NoopNotifier, NotificationDispatcher, PlanLimitChecker, StaticPlanLimits,
    StaticSubscriptions, SubscriptionChecker, TracingNotifier,
};
pub use pipeline::{RevenueGuard, RevenueGuardBuilder};
pub use request::{BlockReason, GuardRequest, GuardResponse};
