use std::{cell::RefCell, time::Duration};

use anyhow::Context;
use pretty_assertions::assert_eq;

use super::*;

fn distribution(with_domain_name: &str, apex: &str) -> Distribution {
    serde_json::from_value(serde_json::json!({
        "ServiceToken": "arn:aws:lambda:eu-west-1:123456789012:function:cloudfront",
        "Apex": apex,
        "Subdomain": "www",
        "Domain": "example.com",
        "StackName": "site",
        "SiteBucketRootName": "site-root",
        "LogsBucket": "site-logs.s3.amazonaws.com",
        "SiteBucketArn": "arn:aws:s3:::site-root",
        "SecureEdgeFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:edge:3",
        "AmplifyHosting": "d1a2b3c4.amplifyapp.com",
        "Branch": "main",
        "WithDomainName": with_domain_name,
        "CertArn": "arn:aws:acm:us-east-1:123456789012:certificate/abc",
    }))
    .unwrap()
}

#[test]
fn config_without_domain_name() {
    let site = distribution("false", "no");
    let config = site.distribution_config("ref-1").unwrap();
    assert_eq!("ref-1", config.caller_reference());
    assert_eq!("Distribution for static website", config.comment());
    assert!(config.enabled());
    assert!(config.aliases().is_none());
    assert!(config.viewer_certificate().is_none());
    assert_eq!("main.d1a2b3c4.amplifyapp.com", site.origin_domain_name());
}

#[test]
fn config_with_domain_name() {
    let site = distribution("true", "no");
    let config = site.distribution_config("ref-2").unwrap();
    assert_eq!("www.example.com", config.comment());
    let aliases = config.aliases().unwrap();
    assert_eq!(1, aliases.quantity());
    assert_eq!(vec!["www.example.com".to_owned()], aliases.items().to_vec());
    let certificate = config.viewer_certificate().unwrap();
    assert_eq!(
        Some("arn:aws:acm:us-east-1:123456789012:certificate/abc"),
        certificate.acm_certificate_arn()
    );
}

#[test]
fn apex_alias_is_the_bare_domain() {
    assert_eq!("example.com", distribution("true", "yes").alias());
    assert_eq!("www.example.com", distribution("true", "no").alias());
}

#[test]
fn tagged_with_stack_name() {
    let tags = distribution("false", "no").tags().unwrap();
    let tag = &tags.items()[0];
    assert_eq!("Name", tag.key());
    assert_eq!(Some("site-Distribution"), tag.value());
}

#[tokio::test]
async fn waits_while_in_progress() {
    let _ = env_logger::builder().is_test(true).try_init();
    let statuses = RefCell::new(vec!["Deployed", "inprogress", "InProgress"]);
    let status = wait_while_in_progress(
        || {
            let next = statuses.borrow_mut().pop();
            async move { next.map(str::to_owned).context("no more statuses") }
        },
        Duration::from_millis(1),
    )
    .await
    .unwrap();
    assert_eq!("Deployed", status);
    assert!(statuses.borrow().is_empty());
}

#[tokio::test]
async fn wait_stops_on_error() {
    let result = wait_while_in_progress(
        || async { Err::<String, _>(anyhow::anyhow!("access denied")) },
        Duration::from_millis(1),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn client_needs_credentials() {
    use aws_config::{BehaviorVersion, Region};
    use aws_credential_types::{provider::SharedCredentialsProvider, Credentials};

    let base = || {
        SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
    };
    let err = cloudfront_client(&base().build()).await.unwrap_err();
    assert_eq!("no credentials provider configured", err.to_string());

    let credentials = Credentials::new("AKIDEXAMPLE", "secret", None, None, "static");
    let cfg = base()
        .credentials_provider(SharedCredentialsProvider::new(credentials))
        .build();
    assert!(cloudfront_client(&cfg).await.is_ok());
}
