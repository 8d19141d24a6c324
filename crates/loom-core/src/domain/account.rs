use serde::{Deserialize, Serialize};

use super::ids::AccountId;

/// Read-only view of an account, owned by account management.
///
/// The scheduler only groups concurrency by `id` and hands the whole value to
/// the collaborator as context. Credentials are resolved by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub provider: String,
    pub display_name: String,
    pub email_address: String,
}

impl Account {
    pub fn new(
        id: AccountId,
        provider: impl Into<String>,
        display_name: impl Into<String>,
        email_address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            provider: provider.into(),
            display_name: display_name.into(),
            email_address: email_address.into(),
        }
    }
}
