//! Cross account sessions.
use std::time::SystemTime;

use aws_config::SdkConfig;
use aws_sdk_sts::config::{Credentials, SharedCredentialsProvider};
use snafu::prelude::*;

use crate::{MissingCredentialsSnafu, Result, StsSnafu};

pub const DEFAULT_ROLE_SESSION_NAME: &str = "s3f2";

/// Returns the SDK config to use for a session.
///
/// With `assume_role_arn` the config carries the role's temporary
/// credentials, otherwise it is `base` unchanged.
pub async fn get_session(
    base: &SdkConfig,
    assume_role_arn: Option<&str>,
    role_session_name: &str,
) -> Result<SdkConfig> {
    let Some(role_arn) = assume_role_arn else {
        return Ok(base.clone());
    };
    log::debug!("assuming {role_arn} as {role_session_name}");
    let out = aws_sdk_sts::Client::new(base)
        .assume_role()
        .role_arn(role_arn)
        .role_session_name(role_session_name)
        .send()
        .await
        .map_err(aws_sdk_sts::Error::from)
        .context(StsSnafu)?;
    let credentials = out
        .credentials
        .context(MissingCredentialsSnafu { role_arn })?;
    let expiry = SystemTime::try_from(credentials.expiration).ok();
    let credentials = Credentials::new(
        credentials.access_key_id,
        credentials.secret_access_key,
        Some(credentials.session_token),
        expiry,
        "AssumeRole",
    );
    Ok(base
        .to_builder()
        .credentials_provider(SharedCredentialsProvider::new(credentials))
        .build())
}
