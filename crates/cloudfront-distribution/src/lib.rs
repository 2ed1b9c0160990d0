//! A CloudFront distribution in front of an Amplify hosted site, deployed as
//! a custom resource.
//!
//! Creation is a single `CreateDistributionWithTags` call. Deletion has to
//! disable the distribution first and wait for CloudFront to finish
//! deploying that change, which can take several minutes.
use std::{future::Future, time::Duration};

use anyhow::Context;
use aws_config::SdkConfig;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_cloudfront::types::{
    Aliases, CookiePreference, CustomErrorResponse, CustomErrorResponses, CustomOriginConfig,
    DefaultCacheBehavior, DistributionConfig, DistributionConfigWithTags, EventType,
    ForwardedValues, HttpVersion, ItemSelection, LambdaFunctionAssociation,
    LambdaFunctionAssociations, LoggingConfig, MinimumProtocolVersion, Origin,
    OriginProtocolPolicy, Origins, PriceClass, SslSupportMethod, Tag, Tags, TrustedSigners,
    ViewerCertificate, ViewerProtocolPolicy,
};
use cfn::{CustomResource, Provisioned};

#[cfg(test)]
mod test;

/// How often a distribution's status is checked while it deploys.
pub const POLL_INTERVAL: Duration = Duration::from_secs(20);

const ORIGIN_ID: &str = "myCustomOrigin";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Distribution {
    // "yes" serves the bare domain instead of the subdomain.
    pub apex: String,
    pub subdomain: String,
    pub domain: String,
    pub stack_name: String,
    pub site_bucket_root_name: String,
    pub logs_bucket: String,
    pub site_bucket_arn: String,
    pub secure_edge_function_arn: String,
    pub amplify_hosting: String,
    pub branch: String,
    // "true" attaches the alias and certificate.
    pub with_domain_name: String,
    pub cert_arn: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionOutput {
    pub domain_name: String,
    pub distro_id: String,
    pub status: String,
    #[serde(rename = "ETag")]
    pub e_tag: Option<String>,
}

impl Distribution {
    pub fn with_domain_name(&self) -> bool {
        self.with_domain_name == "true"
    }

    /// The name viewers reach the site at.
    pub fn alias(&self) -> String {
        if self.apex == "yes" {
            self.domain.clone()
        } else {
            format!("{}.{}", self.subdomain, self.domain)
        }
    }

    pub fn comment(&self) -> String {
        if self.with_domain_name() {
            format!("{}.{}", self.subdomain, self.domain)
        } else {
            "Distribution for static website".to_owned()
        }
    }

    pub fn origin_domain_name(&self) -> String {
        format!("{}.{}", self.branch, self.amplify_hosting)
    }

    pub fn distribution_config(
        &self,
        caller_reference: &str,
    ) -> anyhow::Result<DistributionConfig> {
        let origin = Origin::builder()
            .id(ORIGIN_ID)
            .domain_name(self.origin_domain_name())
            .custom_origin_config(
                CustomOriginConfig::builder()
                    .http_port(80)
                    .https_port(443)
                    .origin_protocol_policy(OriginProtocolPolicy::from("match-viewer"))
                    .build()?,
            )
            .build()?;
        let default_cache_behavior = DefaultCacheBehavior::builder()
            .target_origin_id(ORIGIN_ID)
            .viewer_protocol_policy(ViewerProtocolPolicy::from("redirect-to-https"))
            .trusted_signers(TrustedSigners::builder().enabled(false).quantity(0).build()?)
            .compress(true)
            .min_ttl(600)
            .default_ttl(86400)
            .max_ttl(31536000)
            .forwarded_values(
                ForwardedValues::builder()
                    .query_string(true)
                    .cookies(
                        CookiePreference::builder()
                            .forward(ItemSelection::from("all"))
                            .build()?,
                    )
                    .build()?,
            )
            .lambda_function_associations(
                LambdaFunctionAssociations::builder()
                    .quantity(1)
                    .items(
                        LambdaFunctionAssociation::builder()
                            .event_type(EventType::from("origin-response"))
                            .lambda_function_arn(&self.secure_edge_function_arn)
                            .build()?,
                    )
                    .build()?,
            )
            .build()?;
        let mut custom_error_responses = CustomErrorResponses::builder().quantity(2);
        for code in [404, 403] {
            custom_error_responses = custom_error_responses.items(
                CustomErrorResponse::builder()
                    .error_code(code)
                    .response_code(code.to_string())
                    .response_page_path(format!("/{code}.html"))
                    .error_caching_min_ttl(60)
                    .build()?,
            );
        }
        let mut builder = DistributionConfig::builder()
            .caller_reference(caller_reference)
            .origins(Origins::builder().quantity(1).items(origin).build()?)
            .default_cache_behavior(default_cache_behavior)
            .custom_error_responses(custom_error_responses.build()?)
            .enabled(true)
            .http_version(HttpVersion::from("http2"))
            .default_root_object("index.html")
            .is_ipv6_enabled(true)
            .comment(self.comment())
            .logging(
                LoggingConfig::builder()
                    .enabled(true)
                    .bucket(&self.logs_bucket)
                    .include_cookies(false)
                    .prefix("cdn/")
                    .build(),
            )
            .price_class(PriceClass::from("PriceClass_All"));
        if self.with_domain_name() {
            builder = builder
                .aliases(Aliases::builder().quantity(1).items(self.alias()).build()?)
                .viewer_certificate(
                    ViewerCertificate::builder()
                        .acm_certificate_arn(&self.cert_arn)
                        .minimum_protocol_version(MinimumProtocolVersion::from("TLSv1.1_2016"))
                        .ssl_support_method(SslSupportMethod::from("sni-only"))
                        .build(),
                );
        }
        Ok(builder.build()?)
    }

    fn tags(&self) -> anyhow::Result<Tags> {
        let name = Tag::builder()
            .key("Name")
            .value(format!("{}-Distribution", self.stack_name))
            .build()?;
        Ok(Tags::builder().items(name).build())
    }
}

/// Builds the CloudFront client, failing when no credentials resolve.
pub async fn cloudfront_client(cfg: &SdkConfig) -> anyhow::Result<aws_sdk_cloudfront::Client> {
    let provider = cfg
        .credentials_provider()
        .context("no credentials provider configured")?;
    provider
        .provide_credentials()
        .await
        .context("could not resolve credentials")?;
    Ok(aws_sdk_cloudfront::Client::new(cfg))
}

/// Calls `status` every `interval` until it returns something other than
/// "InProgress", and returns that.
pub async fn wait_while_in_progress<F, Fut>(
    mut status: F,
    interval: Duration,
) -> anyhow::Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    loop {
        let current = status().await?;
        if !current.eq_ignore_ascii_case("inprogress") {
            return Ok(current);
        }
        log::debug!("distribution is {current}, checking again in {interval:?}");
        tokio::time::sleep(interval).await;
    }
}

async fn get_distribution(
    client: &aws_sdk_cloudfront::Client,
    id: &str,
) -> anyhow::Result<(aws_sdk_cloudfront::types::Distribution, String)> {
    let out = client
        .get_distribution()
        .id(id)
        .send()
        .await
        .with_context(|| format!("could not get distribution {id}"))?;
    let distribution = out.distribution.context("missing distribution")?;
    let e_tag = out.e_tag.context("missing distribution etag")?;
    Ok((distribution, e_tag))
}

async fn distribution_status(
    client: &aws_sdk_cloudfront::Client,
    id: &str,
) -> anyhow::Result<String> {
    let (distribution, _) = get_distribution(client, id).await?;
    Ok(distribution.status)
}

impl CustomResource for Distribution {
    type Provider = aws_sdk_cloudfront::Client;
    type Error = anyhow::Error;
    type Output = DistributionOutput;

    async fn create(
        &self,
        client: &Self::Provider,
    ) -> anyhow::Result<Provisioned<Self::Output>> {
        let caller_reference = uuid::Uuid::new_v4().to_string();
        let config = self.distribution_config(&caller_reference)?;
        log::info!("creating distribution {config:#?}");
        let config = DistributionConfigWithTags::builder()
            .distribution_config(config)
            .tags(self.tags()?)
            .build();
        let out = client
            .create_distribution_with_tags()
            .distribution_config_with_tags(config)
            .send()
            .await
            .context("could not create distribution")?;
        let distribution = out.distribution.context("missing distribution")?;
        log::info!(
            "...created distribution {} at {}",
            distribution.id,
            distribution.domain_name
        );
        let output = DistributionOutput {
            domain_name: distribution.domain_name,
            distro_id: distribution.id.clone(),
            status: distribution.status,
            e_tag: out.e_tag,
        };
        Ok(Provisioned::new(distribution.id, output))
    }

    async fn update(
        &self,
        _client: &Self::Provider,
        _previous_local: &Self,
        physical_resource_id: &str,
    ) -> anyhow::Result<Provisioned<Self::Output>> {
        log::warn!(
            "updating distribution {physical_resource_id} is not supported, leaving it as is"
        );
        Ok(Provisioned::keep(physical_resource_id))
    }

    async fn delete(
        &self,
        client: &Self::Provider,
        physical_resource_id: &str,
    ) -> anyhow::Result<()> {
        let (distribution, e_tag) = get_distribution(client, physical_resource_id).await?;
        let mut config = distribution
            .distribution_config
            .context("missing distribution config")?;
        config.enabled = false;
        log::info!("disabling distribution {}", distribution.id);
        let out = client
            .update_distribution()
            .id(&distribution.id)
            .if_match(e_tag)
            .distribution_config(config)
            .send()
            .await
            .with_context(|| format!("could not disable distribution {}", distribution.id))?;
        let id = out.distribution.map(|d| d.id).unwrap_or(distribution.id);

        let status = {
            let id = id.as_str();
            wait_while_in_progress(move || distribution_status(client, id), POLL_INTERVAL).await?
        };
        log::info!("...distribution {id} is {status}");

        let (_, e_tag) = get_distribution(client, &id).await?;
        client
            .delete_distribution()
            .id(&id)
            .if_match(e_tag)
            .send()
            .await
            .with_context(|| format!("could not delete distribution {id}"))?;
        log::info!("...deleted distribution {id}");
        Ok(())
    }
}
