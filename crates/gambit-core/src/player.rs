use serde::{Deserialize, Serialize};

/// Identity a client presents when authenticating. The server decides
/// whether to accept it; nothing here is validated or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerIdentity {
    pub user_id: String,
    pub username: String,
    pub rating: u32,
}

impl PlayerIdentity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, rating: u32) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            rating,
        }
    }

    /// Provisional rating handed to new accounts.
    pub const DEFAULT_RATING: u32 = 1500;
}

/// An opponent or spectator as the server describes them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub rating: Option<u32>,
}
