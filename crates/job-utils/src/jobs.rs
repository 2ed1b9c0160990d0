//! Job rows and job events in DynamoDB.
use std::{collections::HashMap, future::Future, sync::Mutex};

use aws_sdk_dynamodb::types::AttributeValue;
use snafu::prelude::*;

use crate::{
    normalise_dates, DynamoDbSnafu, ItemSnafu, MissingJobSnafu, Result, Settings,
};

pub type Item = HashMap<String, AttributeValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    ForgetCompletedCleanupInProgress,
    Completed,
    CompletedWithErrors,
    Failed,
    FindFailed,
    ForgetFailed,
    ForgetPartiallyFailed,
}

impl JobStatus {
    /// Statuses of jobs that are still being worked on.
    pub const ACTIVE: [JobStatus; 3] = [
        JobStatus::Running,
        JobStatus::Queued,
        JobStatus::ForgetCompletedCleanupInProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::ForgetCompletedCleanupInProgress => "FORGET_COMPLETED_CLEANUP_IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            JobStatus::Failed => "FAILED",
            JobStatus::FindFailed => "FIND_FAILED",
            JobStatus::ForgetFailed => "FORGET_FAILED",
            JobStatus::ForgetPartiallyFailed => "FORGET_PARTIALLY_FAILED",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts a DynamoDB item to plain JSON.
pub fn deserialize_item(item: Item) -> Result<serde_json::Value> {
    serde_dynamo::from_item(item).context(ItemSnafu)
}

/// The table operations used by [`Jobs`].
pub trait JobTable {
    /// The job's metadata row (`Id` and `Sk` both equal to the job id).
    fn get_job(&self, job_id: &str) -> impl Future<Output = Result<Option<Item>>>;

    fn put_item(&self, item: Item) -> impl Future<Output = Result<()>>;

    /// The newest job in index shard `gsi_bucket` whose status is one of
    /// `statuses`, if any.
    fn newest_in_bucket(
        &self,
        gsi_bucket: u32,
        statuses: &[JobStatus],
    ) -> impl Future<Output = Result<Vec<Item>>>;
}

/// The job table in DynamoDB.
#[derive(Clone, Debug)]
pub struct DynamoJobTable {
    pub client: aws_sdk_dynamodb::Client,
    pub table_name: String,
    pub index_name: String,
}

impl DynamoJobTable {
    pub fn new(client: aws_sdk_dynamodb::Client, settings: &Settings) -> Self {
        DynamoJobTable {
            client,
            table_name: settings.job_table.clone(),
            index_name: settings.job_table_date_gsi.clone(),
        }
    }
}

impl JobTable for DynamoJobTable {
    async fn get_job(&self, job_id: &str) -> Result<Option<Item>> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("Id", AttributeValue::S(job_id.to_owned()))
            .key("Sk", AttributeValue::S(job_id.to_owned()))
            .send()
            .await
            .map_err(aws_sdk_dynamodb::Error::from)
            .context(DynamoDbSnafu)?;
        Ok(out.item)
    }

    async fn put_item(&self, item: Item) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(aws_sdk_dynamodb::Error::from)
            .context(DynamoDbSnafu)?;
        Ok(())
    }

    async fn newest_in_bucket(&self, gsi_bucket: u32, statuses: &[JobStatus]) -> Result<Vec<Item>> {
        let filter = (0..statuses.len())
            .map(|i| format!("(#s = :s{i})"))
            .collect::<Vec<_>>()
            .join(" or ");
        let mut query = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(&self.index_name)
            .key_condition_expression("GSIBucket = :b")
            .scan_index_forward(false)
            .filter_expression(filter)
            .expression_attribute_names("#s", "JobStatus")
            .expression_attribute_values(":b", AttributeValue::S(gsi_bucket.to_string()))
            .limit(1);
        for (i, status) in statuses.iter().enumerate() {
            query = query.expression_attribute_values(
                format!(":s{i}"),
                AttributeValue::S(status.as_str().to_owned()),
            );
        }
        let out = query
            .send()
            .await
            .map_err(aws_sdk_dynamodb::Error::from)
            .context(DynamoDbSnafu)?;
        Ok(out.items.unwrap_or_default())
    }
}

fn number(value: &AttributeValue) -> Option<i64> {
    let n = value.as_n().ok()?;
    n.parse::<i64>()
        .ok()
        .or_else(|| n.parse::<f64>().ok().map(|f| f.round_ties_even() as i64))
}

/// Job event emission and job queries.
pub struct Jobs<T> {
    table: T,
    bucket_count: u32,
    // Job expiry, per job id, for the life of the process.
    expiries: Mutex<HashMap<String, Option<i64>>>,
}

impl<T: JobTable> Jobs<T> {
    pub fn new(table: T, bucket_count: u32) -> Self {
        Jobs {
            table,
            bucket_count,
            expiries: Default::default(),
        }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// The job's `Expires` (TTL) attribute.
    pub async fn get_job_expiry(&self, job_id: &str) -> Result<Option<i64>> {
        if let Some(expiry) = self
            .expiries
            .lock()
            .ok()
            .and_then(|expiries| expiries.get(job_id).copied())
        {
            return Ok(expiry);
        }
        let item = self
            .table
            .get_job(job_id)
            .await?
            .context(MissingJobSnafu { job_id })?;
        let expiry = item.get("Expires").and_then(number);
        if let Ok(mut expiries) = self.expiries.lock() {
            expiries.insert(job_id.to_owned(), expiry);
        }
        Ok(expiry)
    }

    /// Writes a `JobEvent` row for the job.
    ///
    /// `emitter_id` defaults to a random uuid and `created_at` (epoch
    /// seconds) to now. The event inherits the job's expiry.
    pub async fn emit_event(
        &self,
        job_id: &str,
        event_name: &str,
        event_data: serde_json::Value,
        emitter_id: Option<&str>,
        created_at: Option<f64>,
    ) -> Result<()> {
        let emitter_id = emitter_id
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let created_at = created_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
        let mut event = serde_json::json!({
            "Id": job_id,
            "Sk": format!(
                "{}#{}",
                (created_at * 1000.0).round_ties_even() as i64,
                uuid::Uuid::new_v4()
            ),
            "Type": "JobEvent",
            "EventName": event_name,
            "EventData": normalise_dates(event_data),
            "EmitterId": emitter_id,
            "CreatedAt": created_at.round_ties_even() as i64,
        });
        if let Some(expiry) = self.get_job_expiry(job_id).await? {
            event["Expires"] = expiry.into();
        }
        log::debug!("emitting {event_name} for job {job_id}");
        let item: Item = serde_dynamo::to_item(event).context(ItemSnafu)?;
        self.table.put_item(item).await
    }

    /// Whether any index shard holds a job that is still being worked on.
    pub async fn running_job_exists(&self) -> Result<bool> {
        for gsi_bucket in 0..self.bucket_count {
            let items = self
                .table
                .newest_in_bucket(gsi_bucket, &JobStatus::ACTIVE)
                .await?;
            if !items.is_empty() {
                log::debug!("found active job in shard {gsi_bucket}");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
