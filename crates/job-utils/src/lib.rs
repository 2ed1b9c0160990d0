//! # job-utils
//!
//! Helpers shared by the find-and-forget job Lambdas.
//!
//! Everything here is a thin layer over the AWS SDK:
//!
//! - [`paginate`] drains paginated API calls into a flat sequence of values,
//! - [`queue`] reads from and writes to SQS within its batch limit,
//! - [`jobs`] emits job events and checks for running jobs in DynamoDB,
//! - [`config`] fetches the JSON configuration from Parameter Store,
//! - [`dates`] normalises ISO-8601 timestamps to epoch seconds,
//! - [`session`] assumes roles through STS.
//!
//! Table names, index names and the configuration parameter are read from
//! the environment, see [`Settings`].

use snafu::prelude::*;

pub mod config;
pub mod dates;
pub mod jobs;
pub mod paginate;
pub mod queue;
pub mod s3;
pub mod session;
pub mod user;

pub use config::get_config;
pub use dates::{convert_iso8601_to_epoch, normalise_dates, utc_timestamp};
pub use jobs::{deserialize_item, DynamoJobTable, Item, JobStatus, JobTable, Jobs};
pub use paginate::{paginate, PageSource, Paginator, TokenPages};
pub use queue::{batch_sqs_msgs, read_queue, BatchOptions, Queue, SqsQueue, BATCH_SIZE};
pub use s3::{parse_s3_url, S3Location};
pub use session::get_session;
pub use user::{get_user_info, UserInfo};

/// Errors returned by the job helpers.
#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Invalid configuration supplied: {msg}"))]
    InvalidConfig { msg: String },

    #[snafu(display("Invalid configuration supplied: {source}"))]
    DecodeConfig { source: serde_json::Error },

    #[snafu(display("Unable to retrieve config: {source}"))]
    RetrieveConfig { source: aws_sdk_ssm::Error },

    #[snafu(display("Unknown error retrieving config: {source}"))]
    UnknownConfig { source: aws_sdk_ssm::Error },

    #[snafu(display("Invalid setting {name}='{value}'"))]
    InvalidSetting { name: String, value: String },

    #[snafu(display("'{value}' is not an ISO-8601 date: {source}"))]
    Iso8601 {
        value: String,
        source: chrono::ParseError,
    },

    #[snafu(display("'{value}' has more than microsecond precision"))]
    Iso8601Fraction { value: String },

    #[snafu(display("Invalid S3 URL '{url}'"))]
    InvalidS3Url { url: String },

    #[snafu(display("SQS request failed: {source}"))]
    Sqs { source: aws_sdk_sqs::Error },

    #[snafu(display("Could not build SQS batch entry: {source}"))]
    BatchEntry {
        source: aws_sdk_sqs::error::BuildError,
    },

    #[snafu(display("Could not encode message: {source}"))]
    EncodeMessage { source: serde_json::Error },

    #[snafu(display("DynamoDB request failed: {source}"))]
    DynamoDb { source: aws_sdk_dynamodb::Error },

    #[snafu(display("Could not convert DynamoDB item: {source}"))]
    Item { source: serde_dynamo::Error },

    #[snafu(display("Job '{job_id}' does not exist"))]
    MissingJob { job_id: String },

    #[snafu(display("STS request failed: {source}"))]
    Sts { source: aws_sdk_sts::Error },

    #[snafu(display("Assuming '{role_arn}' returned no credentials"))]
    MissingCredentials { role_arn: String },

    #[snafu(display("Could not fetch page: {source}"))]
    Page {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Environment-provided settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// `JobTable`
    pub job_table: String,
    /// `JobTableDateGSI`
    pub job_table_date_gsi: String,
    /// `GSIBucketCount`, the number of shards of the date index.
    pub gsi_bucket_count: u32,
    /// `ConfigParam`
    pub config_param: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            job_table: "S3F2_Jobs".to_owned(),
            job_table_date_gsi: "Date-GSI".to_owned(),
            gsi_bucket_count: 1,
            config_param: "S3F2-Configuration".to_owned(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Settings::default();
        let gsi_bucket_count = match lookup("GSIBucketCount") {
            Some(value) => value.trim().parse::<u32>().ok().context(InvalidSettingSnafu {
                name: "GSIBucketCount",
                value,
            })?,
            None => defaults.gsi_bucket_count,
        };
        let settings = Settings {
            job_table: lookup("JobTable").unwrap_or(defaults.job_table),
            job_table_date_gsi: lookup("JobTableDateGSI").unwrap_or(defaults.job_table_date_gsi),
            gsi_bucket_count,
            config_param: lookup("ConfigParam").unwrap_or(defaults.config_param),
        };
        log::debug!("settings: {settings:?}");
        Ok(settings)
    }
}
