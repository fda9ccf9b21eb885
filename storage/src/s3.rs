use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::BucketLocationConstraint;
use aws_sdk_s3::types::CreateBucketConfiguration;
use chrono::DateTime;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::Error;
use crate::Object;
use crate::ObjectSummary;
use crate::Operation;
use crate::PutRequest;
use crate::Result;
use crate::S3Config;

const DEFAULT_REGION: &str = "us-east-1";

fn request_error(
    operation: Operation,
    target: &str,
    err: impl std::error::Error + Send + Sync + 'static,
) -> Error {
    let message = DisplayErrorContext(&err).to_string();
    error!(%operation, target, %message, "S3 request failed");
    Error::Request {
        operation,
        target: target.to_owned(),
        message,
    }
}

#[derive(Clone)]
pub(crate) struct S3Bucket {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
}

impl S3Bucket {
    pub(crate) async fn connect(config: S3Config) -> Self {
        let S3Config {
            endpoint,
            bucket,
            region,
            access_key,
            secret_key,
            force_path_style,
        } = config;
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "orefox",
            ));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint.as_str().trim_end_matches('/'));
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(force_path_style)
            .build();
        info!(
            bucket,
            endpoint = endpoint.as_ref().map(|url| url.as_str()),
            "S3 client initialized"
        );
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket,
            region,
        }
    }

    pub(crate) fn bucket(&self) -> &str {
        &self.bucket
    }

    pub(crate) async fn put(&self, request: PutRequest<'_>) -> Result<()> {
        let size = request.data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(request.key)
            .body(ByteStream::from(request.data))
            .content_type(request.content_type)
            .metadata("sha256", request.checksum_sha256)
            .send()
            .await
            .map_err(|err| request_error(Operation::Put, request.key, err))?;
        debug!(bucket = self.bucket, key = request.key, size, "object written");
        Ok(())
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Object> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(Error::NotFound {
                    key: key.to_owned(),
                });
            }
            Err(err) => return Err(request_error(Operation::Get, key, err)),
        };
        let content_type = output.content_type().map(ToOwned::to_owned);
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| Error::Body {
                key: key.to_owned(),
                message: err.to_string(),
            })?
            .into_bytes();
        Ok(Object { data, content_type })
    }

    pub(crate) async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(request_error(Operation::Head, key, err)),
        }
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| request_error(Operation::Delete, key, err))?;
        debug!(bucket = self.bucket, key, "object deleted");
        Ok(())
    }

    pub(crate) async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut summaries = Vec::new();
        let mut continuation_token = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|err| request_error(Operation::List, prefix, err))?;
            summaries.extend(output.contents().iter().filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_owned(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|date| DateTime::from_timestamp(date.secs(), date.subsec_nanos())),
                })
            }));
            match output.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_owned()),
                None => break,
            }
        }
        Ok(summaries)
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| request_error(Operation::Ping, &self.bucket, err))?;
        Ok(())
    }

    /// Creates the bucket when it does not exist yet
    ///
    /// Returns `true` if the bucket was created.
    pub(crate) async fn ensure_bucket(&self) -> Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(false),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {}
            Err(err) => return Err(request_error(Operation::Ping, &self.bucket, err)),
        }
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        // us-east-1 is the only region rejecting an explicit location constraint
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|err| request_error(Operation::CreateBucket, &self.bucket, err))?;
        info!(bucket = self.bucket, "bucket created");
        Ok(true)
    }
}
