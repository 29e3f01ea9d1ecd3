//! Caller context attached to audit decisions.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            user_agent: Some(user_agent.into()),
        }
    }

    /// Context for work initiated by the platform itself (schedulers, workers).
    pub fn system() -> Self {
        Self {
            ip: None,
            user_agent: Some("system".to_string()),
        }
    }
}
