//! # cfn
//!
//! CloudFormation custom resources backed by AWS Lambda.
//!
//! A custom resource is a CloudFormation resource type whose lifecycle is
//! driven by a Lambda function instead of a native provider. CloudFormation
//! invokes the function with a [`Request`] describing a `Create`, `Update` or
//! `Delete`, and then waits for a [`ResponseBody`] to be `PUT` to the
//! pre-signed `ResponseURL` carried by the request.
//!
//! ## Usage
//!
//! Describe the resource's `ResourceProperties` as a plain serde struct and
//! implement [`CustomResource`] for it. The associated `Provider` is the
//! platform client (ie an `aws_sdk_cloudfront::Client`), built once per cold
//! start and handed to every invocation:
//!
//! ```ignore
//! use std::convert::Infallible;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lambda_runtime::Error> {
//!     let cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
//!     let client = aws_sdk_cloudfront::Client::new(&cfg);
//!     cfn::run::<Distribution>(Ok::<_, Infallible>(client), cfn::Options::default()).await
//! }
//! ```
//!
//! The runner deserializes the properties, dispatches on the request type,
//! fills in the physical resource id and reports back to CloudFormation,
//! turning any resource error into a `FAILED` response.
//!
//! ## Error Handling
//!
//! Errors from resource implementations never escape the runner, they are
//! reported to CloudFormation as the `Reason` of a failed response. The
//! [`Error`] enum covers what can go wrong while talking to CloudFormation
//! itself.

use std::future::Future;

pub mod runner;

pub use runner::{handle, process, run, Options};

/// Marker trait for userland errors.
pub trait UserError: core::fmt::Display + core::fmt::Debug + 'static {}
impl<T: core::fmt::Display + core::fmt::Debug + 'static> UserError for T {}

/// Top-level error enum that encompasses all errors.
#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Could not serialize the response for '{logical_resource_id}': {source}"))]
    SerializeResponse {
        logical_resource_id: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not send the response to CloudFormation: {source}"))]
    SendResponse { source: reqwest::Error },

    #[snafu(display("CloudFormation rejected the response with status {status}"))]
    ResponseRejected { status: u16 },
}

type Result<T, E = Error> = core::result::Result<T, E>;

/// The lifecycle event CloudFormation is asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl core::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
        })
    }
}

/// A custom resource request, as sent by CloudFormation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    pub request_type: RequestType,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    #[serde(default)]
    pub resource_type: String,
    pub logical_resource_id: String,
    // Absent on Create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: serde_json::Value,
    // Only present on Update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<serde_json::Value>,
}

impl Request {
    /// The stack name, taken from the stack ARN
    /// (`arn:aws:cloudformation:<region>:<account>:stack/<name>/<guid>`).
    pub fn stack_name(&self) -> &str {
        self.stack_id
            .split('/')
            .nth(1)
            .unwrap_or(self.stack_id.as_str())
    }

    /// A physical resource id for resources that don't name themselves.
    pub fn generate_physical_id(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}",
            self.stack_name(),
            self.logical_resource_id,
            &suffix[..8]
        )
    }

    /// The request as it is safe to log, without the pre-signed response URL.
    pub fn redacted(&self) -> Request {
        Request {
            response_url: "[REDACTED]".to_owned(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failed,
}

/// The response CloudFormation expects at the request's `ResponseURL`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseBody {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub no_echo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ResponseBody {
    fn for_request(request: &Request, status: Status, physical_resource_id: String) -> Self {
        ResponseBody {
            status,
            reason: None,
            physical_resource_id,
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            no_echo: false,
            data: None,
        }
    }

    /// A successful response.
    pub fn success(
        request: &Request,
        physical_resource_id: String,
        data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        ResponseBody {
            data,
            ..Self::for_request(request, Status::Success, physical_resource_id)
        }
    }

    /// A failed response.
    ///
    /// The physical id is always set, even if the resource never got one,
    /// so that CloudFormation can address it in the rollback `Delete`.
    pub fn failed(request: &Request, reason: impl Into<String>) -> Self {
        let physical_resource_id = request
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| request.generate_physical_id());
        ResponseBody {
            reason: Some(reason.into()),
            ..Self::for_request(request, Status::Failed, physical_resource_id)
        }
    }
}

/// What a `Create` or `Update` provisioned.
#[derive(Clone, Debug, PartialEq)]
pub struct Provisioned<T> {
    /// The resource's physical id.
    ///
    /// `None` lets the runner pick one: a generated id on `Create`, the
    /// current id on `Update`.
    pub physical_resource_id: Option<String>,
    /// Output attributes, readable with `Fn::GetAtt` in the template.
    pub data: Option<T>,
}

impl<T> Default for Provisioned<T> {
    fn default() -> Self {
        Provisioned {
            physical_resource_id: None,
            data: None,
        }
    }
}

impl<T> Provisioned<T> {
    pub fn new(physical_resource_id: impl Into<String>, data: T) -> Self {
        Provisioned {
            physical_resource_id: Some(physical_resource_id.into()),
            data: Some(data),
        }
    }

    /// Keeps the given physical id, without output attributes.
    pub fn keep(physical_resource_id: impl Into<String>) -> Self {
        Provisioned {
            physical_resource_id: Some(physical_resource_id.into()),
            data: None,
        }
    }
}

/// A custom resource.
///
/// Implemented by the type of the resource's `ResourceProperties`.
/// CloudFormation passes every property as a string, so implementors
/// usually hold `String` fields.
pub trait CustomResource:
    core::fmt::Debug + PartialEq + serde::de::DeserializeOwned + 'static
{
    /// Type of the platform/resource provider.
    ///
    /// For example `aws_sdk_lambda::Client`.
    type Provider;

    /// Errors that may occur interacting with the provider.
    type Error: UserError;

    /// Output attributes of the resource.
    ///
    /// Must serialize to a JSON object (or to `null` for none).
    type Output: serde::Serialize;

    /// Creates the resource on the platform.
    fn create(
        &self,
        provider: &Self::Provider,
    ) -> impl Future<Output = Result<Provisioned<Self::Output>, Self::Error>>;

    /// Updates the resource on the platform.
    ///
    /// The default keeps the resource as is, reporting success with the
    /// current physical id.
    fn update(
        &self,
        _provider: &Self::Provider,
        _previous_local: &Self,
        physical_resource_id: &str,
    ) -> impl Future<Output = Result<Provisioned<Self::Output>, Self::Error>> {
        let kept = Provisioned::keep(physical_resource_id);
        async move { Ok(kept) }
    }

    /// Deletes the resource from the platform.
    ///
    /// The default leaves cleanup to the platform.
    fn delete(
        &self,
        _provider: &Self::Provider,
        _physical_resource_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> {
        async { Ok(()) }
    }
}
