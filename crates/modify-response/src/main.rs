use aws_config::{BehaviorVersion, Region};
use modify_response::{lambda_client, EdgeFunction, EDGE_REGION};

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    // CloudWatch adds the ingestion time.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let cfg = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(EDGE_REGION))
        .load()
        .await;
    // An Err here fails every request with its message.
    let client = lambda_client(&cfg).await.map_err(|e| format!("{e:#}"));
    Box::pin(cfn::run::<EdgeFunction>(client, cfn::Options::default())).await
}
