//! S3 URLs.
use crate::{Error, Result};

/// A bucket and an optional key within it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: Option<String>,
}

/// Splits `s3://bucket/key` into its bucket and key.
pub fn parse_s3_url(s3_url: &str) -> Result<S3Location> {
    let Some(path) = s3_url.strip_prefix("s3://") else {
        return Err(Error::InvalidS3Url {
            url: s3_url.to_owned(),
        });
    };
    let (bucket, key) = match path.split_once('/') {
        Some((bucket, key)) => (bucket, Some(key.to_owned())),
        None => (path, None),
    };
    Ok(S3Location {
        bucket: bucket.to_owned(),
        key,
    })
}
