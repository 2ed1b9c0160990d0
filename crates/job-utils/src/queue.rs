//! Reading and batch writing SQS messages.
use std::future::Future;

use aws_sdk_sqs::types::{
    Message, MessageSystemAttributeName, QueueAttributeName, SendMessageBatchRequestEntry,
};
use snafu::prelude::*;

use crate::{BatchEntrySnafu, EncodeMessageSnafu, Result, SqsSnafu};

/// The most messages SQS receives or sends in a single request.
pub const BATCH_SIZE: usize = 10;

/// The queue operations used by [`read_queue`] and [`batch_sqs_msgs`].
pub trait Queue {
    /// Receives up to `max` messages, with all of their attributes.
    fn receive(&self, max: i32) -> impl Future<Output = Result<Vec<Message>>>;

    /// Whether this is a FIFO queue.
    fn is_fifo(&self) -> impl Future<Output = Result<bool>>;

    /// Sends a batch of at most [`BATCH_SIZE`] entries.
    fn send_batch(
        &self,
        entries: Vec<SendMessageBatchRequestEntry>,
    ) -> impl Future<Output = Result<()>>;
}

/// An SQS queue.
#[derive(Clone, Debug)]
pub struct SqsQueue {
    pub client: aws_sdk_sqs::Client,
    pub queue_url: String,
}

impl SqsQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        SqsQueue {
            client,
            queue_url: queue_url.into(),
        }
    }
}

impl Queue for SqsQueue {
    async fn receive(&self, max: i32) -> Result<Vec<Message>> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(aws_sdk_sqs::Error::from)
            .context(SqsSnafu)?;
        Ok(out.messages.unwrap_or_default())
    }

    async fn is_fifo(&self) -> Result<bool> {
        let out = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::FifoQueue)
            .send()
            .await
            .map_err(aws_sdk_sqs::Error::from)
            .context(SqsSnafu)?;
        Ok(out
            .attributes
            .and_then(|attributes| attributes.get(&QueueAttributeName::FifoQueue).cloned())
            .is_some_and(|fifo| fifo.eq_ignore_ascii_case("true")))
    }

    async fn send_batch(&self, entries: Vec<SendMessageBatchRequestEntry>) -> Result<()> {
        let out = self
            .client
            .send_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(aws_sdk_sqs::Error::from)
            .context(SqsSnafu)?;
        for failed in out.failed() {
            log::warn!(
                "message {} was not sent: {} {}",
                failed.id(),
                failed.code(),
                failed.message().unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Reads up to `number_to_read` messages, stopping early once the queue
/// comes back empty.
pub async fn read_queue(queue: &impl Queue, number_to_read: usize) -> Result<Vec<Message>> {
    let mut msgs = Vec::with_capacity(number_to_read);
    while msgs.len() < number_to_read {
        let remaining = number_to_read - msgs.len();
        let received = queue.receive(remaining.min(BATCH_SIZE) as i32).await?;
        if received.is_empty() {
            log::debug!("no messages left after reading {}", msgs.len());
            break;
        }
        msgs.extend(received.into_iter().take(remaining));
    }
    Ok(msgs)
}

/// Extra attributes set on every entry of a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchOptions {
    pub delay_seconds: Option<i32>,
}

fn batch_entry(
    message: &impl serde::Serialize,
    fifo: bool,
    options: &BatchOptions,
) -> Result<SendMessageBatchRequestEntry> {
    let body = serde_json::to_string(message).context(EncodeMessageSnafu)?;
    SendMessageBatchRequestEntry::builder()
        .id(uuid::Uuid::new_v4().to_string())
        .message_body(body)
        .set_message_group_id(fifo.then(|| uuid::Uuid::new_v4().to_string()))
        .set_delay_seconds(options.delay_seconds)
        .build()
        .context(BatchEntrySnafu)
}

/// Sends `messages` as JSON in batches of at most [`BATCH_SIZE`].
///
/// Entries sent to a FIFO queue each get their own message group.
pub async fn batch_sqs_msgs<M: serde::Serialize>(
    queue: &impl Queue,
    messages: &[M],
    options: &BatchOptions,
) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    let fifo = queue.is_fifo().await?;
    for chunk in messages.chunks(BATCH_SIZE) {
        let entries = chunk
            .iter()
            .map(|message| batch_entry(message, fifo, options))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("sending batch of {} messages", entries.len());
        queue.send_batch(entries).await?;
    }
    Ok(())
}
