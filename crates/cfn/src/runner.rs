//! Drives custom resource requests through their lifecycle and reports the
//! outcome back to CloudFormation.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lambda_runtime::{service_fn, LambdaEvent};
use snafu::prelude::*;

use crate::{
    CustomResource, Request, RequestType, ResponseBody, ResponseRejectedSnafu, Result,
    SendResponseSnafu, SerializeResponseSnafu,
};

/// Runner options.
#[derive(Clone, Debug)]
pub struct Options {
    /// How long to pause before answering a `Delete`.
    ///
    /// Gives the function's own log stream time to flush when the stack
    /// that owns it is being torn down. Capped by the time left in the
    /// invocation.
    pub sleep_on_delete: Duration,
    /// How long before the invocation deadline a `FAILED` response is sent
    /// in place of a late one.
    pub timeout_margin: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            sleep_on_delete: Duration::ZERO,
            timeout_margin: Duration::from_secs(2),
        }
    }
}

impl Options {
    pub fn with_sleep_on_delete(mut self, sleep_on_delete: Duration) -> Self {
        self.sleep_on_delete = sleep_on_delete;
        self
    }
}

fn read_properties<T: serde::de::DeserializeOwned>(
    value: &serde_json::Value,
    field: &str,
) -> Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("could not read {field}: {e}"))
}

fn output_data<O: serde::Serialize>(
    output: Option<O>,
) -> Result<Option<serde_json::Map<String, serde_json::Value>>, String> {
    let Some(output) = output else {
        return Ok(None);
    };
    match serde_json::to_value(output) {
        Ok(serde_json::Value::Null) => Ok(None),
        Ok(serde_json::Value::Object(data)) => Ok(Some(data)),
        Ok(other) => Err(format!(
            "resource output must be a JSON object, saw '{other}'"
        )),
        Err(e) => Err(format!("could not serialize resource output: {e}")),
    }
}

async fn run_action<T: CustomResource>(
    request: &Request,
    provider: &T::Provider,
) -> Result<ResponseBody, String> {
    match request.request_type {
        RequestType::Create => {
            let local: T = read_properties(&request.resource_properties, "ResourceProperties")?;
            let provisioned = local
                .create(provider)
                .await
                .map_err(|error| error.to_string())?;
            let physical_resource_id = provisioned
                .physical_resource_id
                .unwrap_or_else(|| request.generate_physical_id());
            Ok(ResponseBody::success(
                request,
                physical_resource_id,
                output_data(provisioned.data)?,
            ))
        }
        RequestType::Update => {
            let physical_resource_id = request
                .physical_resource_id
                .as_deref()
                .ok_or("missing PhysicalResourceId")?;
            let local: T = read_properties(&request.resource_properties, "ResourceProperties")?;
            let previous_local: T = read_properties(
                request
                    .old_resource_properties
                    .as_ref()
                    .ok_or("missing OldResourceProperties")?,
                "OldResourceProperties",
            )?;
            if previous_local == local {
                log::debug!("  properties of '{physical_resource_id}' have not changed");
            } else {
                let cmp = pretty_assertions::Comparison::new(&previous_local, &local);
                let change_string = format!("{cmp}")
                    .lines()
                    .map(|line| format!("  {line}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                log::info!("updating '{physical_resource_id}':\n{change_string}");
            }
            let provisioned = local
                .update(provider, &previous_local, physical_resource_id)
                .await
                .map_err(|error| error.to_string())?;
            Ok(ResponseBody::success(
                request,
                provisioned
                    .physical_resource_id
                    .unwrap_or_else(|| physical_resource_id.to_owned()),
                output_data(provisioned.data)?,
            ))
        }
        RequestType::Delete => {
            let physical_resource_id = request
                .physical_resource_id
                .as_deref()
                .ok_or("missing PhysicalResourceId")?;
            match read_properties::<T>(&request.resource_properties, "ResourceProperties") {
                Ok(local) => local
                    .delete(provider, physical_resource_id)
                    .await
                    .map_err(|error| error.to_string())?,
                // Nothing can have been created from properties we can't read.
                Err(reason) => log::warn!("skipping delete of '{physical_resource_id}', {reason}"),
            }
            Ok(ResponseBody::success(
                request,
                physical_resource_id.to_owned(),
                None,
            ))
        }
    }
}

/// Runs the request's lifecycle action against the resource.
///
/// Never fails, errors are reported as a `FAILED` response.
pub async fn process<T: CustomResource>(request: &Request, provider: &T::Provider) -> ResponseBody {
    log::info!(
        "{} '{}' ({}):",
        request.request_type,
        request.logical_resource_id,
        std::any::type_name::<T>()
    );
    match run_action::<T>(request, provider).await {
        Ok(body) => {
            log::info!("  success!");
            body
        }
        Err(reason) => {
            log::error!(
                "  {} '{}' failed: {reason}",
                request.request_type,
                request.logical_resource_id
            );
            ResponseBody::failed(request, reason)
        }
    }
}

/// Time left until `deadline_ms` (milliseconds since the epoch).
///
/// `None` when there is no deadline.
fn remaining(deadline_ms: u64) -> Option<Duration> {
    if deadline_ms == 0 {
        return None;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Some(Duration::from_millis(deadline_ms).saturating_sub(now))
}

/// Produces the response to a request, guarding against an unusable
/// provider and against running out of time.
pub(crate) async fn respond<T: CustomResource>(
    request: &Request,
    deadline_ms: u64,
    provider: core::result::Result<&T::Provider, &str>,
    options: &Options,
) -> ResponseBody {
    let provider = match provider {
        Ok(provider) => provider,
        Err(reason) => {
            log::error!("provider failed to initialize: {reason}");
            return ResponseBody::failed(request, reason);
        }
    };

    let budget = remaining(deadline_ms).map(|left| left.saturating_sub(options.timeout_margin));
    let body = match budget {
        Some(budget) => match tokio::time::timeout(budget, process::<T>(request, provider)).await {
            Ok(body) => body,
            Err(_) => {
                log::error!("execution is about to time out, sending failure response");
                ResponseBody::failed(request, "Execution timed out")
            }
        },
        None => process::<T>(request, provider).await,
    };

    if request.request_type == RequestType::Delete && !options.sleep_on_delete.is_zero() {
        let pause = match remaining(deadline_ms) {
            Some(left) => options
                .sleep_on_delete
                .min(left.saturating_sub(options.timeout_margin)),
            None => options.sleep_on_delete,
        };
        log::debug!("sleeping {}s before answering delete", pause.as_secs());
        tokio::time::sleep(pause).await;
    }

    body
}

/// Sends `body` to CloudFormation.
pub async fn send(response_url: &str, body: &ResponseBody) -> Result<()> {
    let json = serde_json::to_string(body).context(SerializeResponseSnafu {
        logical_resource_id: body.logical_resource_id.clone(),
    })?;
    log::debug!("response body:\n{json}");

    let response = reqwest::Client::new()
        .put(response_url)
        // The pre-signed URL is signed without a content type.
        .header("content-type", "")
        .body(json)
        .send()
        .await
        .context(SendResponseSnafu);
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            log::error!("{e}");
            return Err(e);
        }
    };

    let status = response.status();
    log::info!("CloudFormation responded with {status}");
    snafu::ensure!(
        status.is_success(),
        ResponseRejectedSnafu {
            status: status.as_u16()
        }
    );
    Ok(())
}

/// Handles one Lambda invocation: runs the lifecycle action and reports the
/// outcome to CloudFormation.
pub async fn handle<T: CustomResource>(
    event: LambdaEvent<Request>,
    provider: core::result::Result<&T::Provider, &str>,
    options: &Options,
) -> Result<()> {
    let LambdaEvent {
        payload: request,
        context,
    } = event;
    log::info!(
        "received request:\n{}",
        serde_json::to_string_pretty(&request.redacted()).unwrap_or_default()
    );
    let body = respond::<T>(&request, context.deadline, provider, options).await;
    send(&request.response_url, &body).await
}

/// Runs the Lambda service loop for the custom resource `T`.
///
/// Pass the provider as built at cold start. If building it failed, every
/// request is answered with a `FAILED` response carrying the error.
pub async fn run<T: CustomResource>(
    provider: core::result::Result<T::Provider, impl core::fmt::Display>,
    options: Options,
) -> Result<(), lambda_runtime::Error> {
    let provider = provider.map_err(|e| e.to_string());
    let provider = provider.as_ref().map_err(String::as_str);
    let options = &options;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Request>| async move {
        handle::<T>(event, provider, options)
            .await
            .map_err(lambda_runtime::Error::from)
    }))
    .await
}
