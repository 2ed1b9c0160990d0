//! The caller of an API Gateway request.

/// Cognito identity of the caller.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserInfo {
    pub username: String,
    pub sub: String,
}

/// Reads the caller's identity from the authorizer claims of an API Gateway
/// proxy event, `"N/A"` for anything missing.
pub fn get_user_info(event: &serde_json::Value) -> UserInfo {
    let claims = &event["requestContext"]["authorizer"]["claims"];
    let claim = |name: &str| claims[name].as_str().unwrap_or("N/A").to_owned();
    UserInfo {
        username: claim("cognito:username"),
        sub: claim("sub"),
    }
}
