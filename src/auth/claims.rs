use serde::{Deserialize, Serialize};

/// Payload of a custom token. `uid` is the only claim the identity provider
/// reads back as the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomClaims {
    pub iss: String, // signer identity
    pub sub: String, // signer identity (service account) or uid
    pub aud: String, // token exchange audience
    pub iat: usize,  // issued at (unix timestamp)
    pub exp: usize,  // expires at, at most one hour after iat
    pub uid: String, // user ID
}
