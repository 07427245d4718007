use serde::{Deserialize, Serialize};

use crate::models::Role;

/// JWT claims minted by the portal's login flow and consumed by the chat
/// gateway. Canonical definition lives here so the gateway and any future
/// REST surface share one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Portal user id.
    pub sub: i64,
    pub username: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub display_name: String,
    pub exp: usize,
}
