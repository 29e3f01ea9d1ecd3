//! Shared identifiers, business references, and money helpers.

mod context;
mod ids;
pub mod money;
mod reference;

pub use context::RequestContext;
pub use ids::{CreditId, DecisionId, EntryId, TenantId, WalletId};
pub use reference::Reference;
