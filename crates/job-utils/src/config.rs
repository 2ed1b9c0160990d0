//! JSON configuration kept in SSM Parameter Store.
use snafu::{prelude::*, IntoError};

use crate::{
    DecodeConfigSnafu, Error, InvalidConfigSnafu, Result, RetrieveConfigSnafu, UnknownConfigSnafu,
};

/// Decodes the raw parameter value.
pub(crate) fn parse_config(value: Option<&str>) -> Result<serde_json::Value> {
    let result = value
        .context(InvalidConfigSnafu {
            msg: "parameter has no value",
        })
        .and_then(|value| serde_json::from_str(value).context(DecodeConfigSnafu));
    if let Err(e) = &result {
        log::error!("{e}");
    }
    result
}

/// Fetches and decodes the configuration parameter `param_name`.
///
/// A parameter that is missing its value or isn't JSON is invalid
/// configuration. Failures to reach SSM are told apart by whether SSM
/// answered with an error or the request never completed.
pub async fn get_config(
    client: &aws_sdk_ssm::Client,
    param_name: &str,
) -> Result<serde_json::Value> {
    let out = match client
        .get_parameter()
        .name(param_name)
        .with_decryption(true)
        .send()
        .await
    {
        Ok(out) => out,
        Err(e) => {
            let answered = e.as_service_error().is_some();
            let source = aws_sdk_ssm::Error::from(e);
            let error: Error = if answered {
                RetrieveConfigSnafu.into_error(source)
            } else {
                UnknownConfigSnafu.into_error(source)
            };
            log::error!("{error}");
            return Err(error);
        }
    };
    parse_config(out.parameter().and_then(|parameter| parameter.value()))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_json_config() {
        let config = parse_config(Some(r#"{"AthenaConcurrencyLimit": 15, "DeletionTasksMaxNumber": 3}"#))
            .unwrap();
        assert_eq!(15, config["AthenaConcurrencyLimit"]);
    }

    #[test]
    fn missing_value_is_invalid() {
        let err = parse_config(None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }), "{err:?}");
    }

    #[test]
    fn undecodable_value_is_invalid() {
        let err = parse_config(Some("{not json")).unwrap_err();
        assert!(matches!(err, Error::DecodeConfig { .. }), "{err:?}");
        assert!(err.to_string().starts_with("Invalid configuration supplied"));
    }

    fn ssm_client(endpoint_url: String) -> aws_sdk_ssm::Client {
        use aws_sdk_ssm::config::{retry::RetryConfig, BehaviorVersion, Credentials, Region};

        let config = aws_sdk_ssm::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-1"))
            .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "static"))
            .retry_config(RetryConfig::disabled())
            .endpoint_url(endpoint_url)
            .build();
        aws_sdk_ssm::Client::from_conf(config)
    }

    #[tokio::test]
    async fn unreachable_ssm_is_unknown_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ssm_client(format!("http://{addr}"));
        let err = get_config(&client, "S3F2-Configuration").await.unwrap_err();
        assert!(matches!(err, Error::UnknownConfig { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn ssm_error_response_is_retrieve_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if body.len() >= length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let body = r#"{"__type":"ParameterNotFound","message":"no such parameter"}"#;
            let reply = format!(
                "HTTP/1.1 400 Bad Request\r\n\
                 content-type: application/x-amz-json-1.1\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
        });

        let client = ssm_client(format!("http://{addr}"));
        let err = get_config(&client, "S3F2-Configuration").await.unwrap_err();
        assert!(matches!(err, Error::RetrieveConfig { .. }), "{err:?}");
        server.await.unwrap();
    }
}
