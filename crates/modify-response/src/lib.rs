//! A Lambda@Edge origin-response function, deployed as a custom resource.
//!
//! The function itself is a few lines of Python that hand CloudFront's
//! response back untouched. It is packaged in memory, created in
//! `us-east-1` (the only region Lambda@Edge replicates from) and published,
//! so that the distribution can reference the qualified ARN.
use std::io::{Cursor, Write};

use anyhow::Context;
use aws_config::SdkConfig;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_lambda::{
    primitives::Blob,
    types::{FunctionCode, Runtime},
};
use cfn::{CustomResource, Provisioned};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// Region Lambda@Edge functions must be created in.
pub const EDGE_REGION: &str = "us-east-1";

pub const HANDLER_FILE: &str = "append_headers.py";
pub const HANDLER: &str = "append_headers.handler";
pub const HANDLER_SOURCE: &str = r#"
def handler(event, context):
    return event['Records'][0]['cf']['response']
"#;

/// Builds the Lambda client, failing when no credentials resolve.
pub async fn lambda_client(cfg: &SdkConfig) -> anyhow::Result<aws_sdk_lambda::Client> {
    let provider = cfg
        .credentials_provider()
        .context("no credentials provider configured")?;
    provider
        .provide_credentials()
        .await
        .context("could not resolve credentials")?;
    Ok(aws_sdk_lambda::Client::new(cfg))
}

/// Zips the handler source.
pub fn package_handler() -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o777);
    zip.start_file(HANDLER_FILE, options)
        .context("could not start handler entry")?;
    zip.write_all(HANDLER_SOURCE.as_bytes())
        .context("could not write handler entry")?;
    let package = zip.finish().context("could not finish handler package")?;
    Ok(package.into_inner())
}

/// Base64 SHA-256 of a deployment package, as Lambda reports `CodeSha256`.
pub fn code_sha256(package: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, package);
    data_encoding::BASE64.encode(digest.as_ref())
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EdgeFunction {
    // ARN of the execution role.
    pub role_arn: String,
    // The function is named "<prefix>-<uuid>".
    pub resource_prefix: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EdgeFunctionOutput {
    pub function_arn_with_version: String,
}

impl CustomResource for EdgeFunction {
    type Provider = aws_sdk_lambda::Client;
    type Error = anyhow::Error;
    type Output = EdgeFunctionOutput;

    async fn create(
        &self,
        client: &Self::Provider,
    ) -> anyhow::Result<Provisioned<Self::Output>> {
        let package = package_handler()?;
        let sha256 = code_sha256(&package);
        let function_name = format!("{}-{}", self.resource_prefix, uuid::Uuid::new_v4());
        log::info!(
            "creating edge function {function_name} from {} bytes",
            package.len()
        );
        let out = client
            .create_function()
            .function_name(&function_name)
            .runtime(Runtime::Python312)
            .role(&self.role_arn)
            .handler(HANDLER)
            .code(FunctionCode::builder().zip_file(Blob::new(package)).build())
            .description("Lambda@Edge for secure headers")
            .timeout(5)
            .publish(true)
            .send()
            .await
            .with_context(|| format!("could not create function {function_name}"))?;
        if out.code_sha256() != Some(sha256.as_str()) {
            log::warn!(
                "uploaded package sha256 {sha256} but lambda reports {:?}",
                out.code_sha256()
            );
        }
        let arn = out.function_arn.context("missing function arn")?;
        let version = out.version.context("missing function version")?;
        log::info!("...created edge function {arn} version {version}");
        let output = EdgeFunctionOutput {
            function_arn_with_version: format!("{arn}:{version}"),
        };
        Ok(Provisioned::new(arn, output))
    }

    /// Published versions are immutable, so an update is a fresh function.
    /// CloudFormation then deletes the old one, which is left in place since
    /// replicated edge functions can't be deleted right away.
    async fn update(
        &self,
        client: &Self::Provider,
        _previous_local: &Self,
        _physical_resource_id: &str,
    ) -> anyhow::Result<Provisioned<Self::Output>> {
        self.create(client).await
    }
}
