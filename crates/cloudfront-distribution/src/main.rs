use std::time::Duration;

use aws_config::BehaviorVersion;
use cloudfront_distribution::{cloudfront_client, Distribution};

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    // CloudWatch adds the ingestion time.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let cfg = aws_config::defaults(BehaviorVersion::latest()).load().await;
    // An Err here fails every request with its message.
    let client = cloudfront_client(&cfg).await.map_err(|e| format!("{e:#}"));
    let options = cfn::Options::default().with_sleep_on_delete(Duration::from_secs(120));
    Box::pin(cfn::run::<Distribution>(client, options)).await
}
