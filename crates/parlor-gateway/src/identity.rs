use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::warn;

use parlor_types::api::Claims;
use parlor_types::models::ChatIdentity;

/// Resolve the connection identity from the portal-issued JWT carried on
/// the upgrade request. Absent or invalid tokens yield an anonymous
/// observer — the connection is still accepted, it just can't operate.
pub fn resolve_identity(token: Option<&str>, jwt_secret: &str) -> Option<ChatIdentity> {
    let token = token?;

    let data = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data,
        Err(e) => {
            warn!("rejecting gateway token: {}", e);
            return None;
        }
    };

    let claims = data.claims;
    Some(ChatIdentity {
        user_id: claims.sub,
        username: claims.username,
        role: claims.role,
        display_name: claims.display_name,
    })
}
