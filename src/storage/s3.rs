use crate::config::ClientConfig;
use crate::storage::backend::{ObjectStoreClient, ObjectStream};
use crate::types::{
    ByteRange, ListPage, ListingQuery, ObjectDescriptor, PageToken, Result, StoreError,
};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

/// Object store client backed by the AWS SDK
pub struct S3Backend {
    client: S3Client,
    name: String,
}

impl S3Backend {
    /// Build the SDK client once; region, endpoint and credentials are bound
    /// here and never consulted again by the lister or the reader.
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(profile) = &config.profile {
            config_loader = config_loader.profile_name(profile);
        }

        // Set credentials if provided
        if let (Some(key_id), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            config_loader = config_loader.credentials_provider(
                aws_sdk_s3::config::Credentials::new(key_id, secret_key, None, None, "static"),
            );
        }

        let sdk_config = config_loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style);

        // Set custom endpoint if provided
        if let Some(endpoint_url) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        tracing::info!(
            "[{}] S3 client ready (region: {}, endpoint: {:?})",
            config.name,
            config.region,
            config.endpoint
        );

        Ok(Self {
            client,
            name: config.name.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(
        key: &str,
        size: Option<i64>,
        etag: Option<&str>,
        last_modified: Option<&aws_sdk_s3::primitives::DateTime>,
    ) -> ObjectDescriptor {
        let last_modified = last_modified
            .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
            .unwrap_or_default();

        ObjectDescriptor {
            key: key.to_string(),
            size: size.unwrap_or(0).max(0) as u64,
            last_modified,
            etag: etag.map(|s| s.to_string()).unwrap_or_default(),
        }
    }

    /// Map an SDK failure onto the error taxonomy
    fn classify<E>(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        err: SdkError<E, HttpResponse>,
    ) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let message = DisplayErrorContext(&err).to_string();

        match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                StoreError::Transient(message)
            }
            SdkError::ServiceError(service_err) => {
                let raw = service_err.raw();
                let classified = classify_service_error(
                    service_err.err().code(),
                    raw.status().as_u16(),
                    raw.headers().get("content-range"),
                    range,
                    bucket,
                    key,
                    message,
                );
                if let StoreError::Backend(message) = &classified {
                    tracing::error!("[{}] Unexpected S3 error: {}", self.name, message);
                }
                classified
            }
            _ => StoreError::Backend(message),
        }
    }
}

/// Classify an S3 error response by its error code, falling back to the HTTP
/// status when the code is missing or unknown.
fn classify_service_error(
    code: Option<&str>,
    status: u16,
    content_range: Option<&str>,
    range: Option<ByteRange>,
    bucket: &str,
    key: &str,
    message: String,
) -> StoreError {
    match (code, status) {
        (Some("NoSuchKey" | "NoSuchBucket" | "NotFound"), _) | (_, 404) => {
            StoreError::not_found(bucket, key)
        }
        (Some("AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _)
        | (_, 401 | 403) => StoreError::AccessDenied(message),
        (
            Some("SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout" | "Throttling"),
            _,
        )
        | (_, 408 | 429 | 500..=599) => StoreError::Transient(message),
        (Some("InvalidRange"), _) | (_, 416) => match range {
            // An unsatisfiable range reports the object size as "bytes */size"
            Some(range) => StoreError::InvalidRange {
                start: range.start(),
                end: range.end(),
                size: content_range
                    .and_then(|r| r.rsplit('/').next())
                    .and_then(|size| size.parse().ok())
                    .unwrap_or(0),
            },
            None => StoreError::InvalidInput(message),
        },
        _ => StoreError::Backend(message),
    }
}

#[async_trait::async_trait]
impl ObjectStoreClient for S3Backend {
    async fn list_page(
        &self,
        query: &ListingQuery,
        token: Option<&PageToken>,
        max_keys: usize,
    ) -> Result<ListPage> {
        tracing::debug!(
            "[{}] Listing s3://{}/{} (token: {:?})",
            self.name,
            query.bucket(),
            query.prefix(),
            token
        );

        let result = self
            .client
            .list_objects_v2()
            .bucket(query.bucket())
            .prefix(query.prefix())
            .set_delimiter(query.delimiter().map(str::to_string))
            .set_continuation_token(token.map(|t| t.as_str().to_string()))
            .max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                return match self.classify(query.bucket(), query.prefix(), None, err) {
                    StoreError::NotFound { .. } => {
                        tracing::debug!("[{}] Bucket {} not found", self.name, query.bucket());
                        Ok(ListPage::default())
                    }
                    other => Err(other),
                };
            }
        };

        let objects: Vec<ObjectDescriptor> = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                Some(Self::descriptor(
                    key,
                    obj.size(),
                    obj.e_tag(),
                    obj.last_modified(),
                ))
            })
            .collect();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(PageToken::new)
        } else {
            None
        };

        tracing::debug!("[{}] Found {} objects", self.name, objects.len());

        Ok(ListPage {
            objects,
            common_prefixes,
            next_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectDescriptor> {
        tracing::debug!("[{}] Getting metadata for object: {}", self.name, key);

        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| self.classify(bucket, key, None, err))?;

        Ok(Self::descriptor(
            key,
            output.content_length(),
            output.e_tag(),
            output.last_modified(),
        ))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(ObjectStream, ObjectDescriptor)> {
        tracing::debug!("[{}] Getting object: {} (range: {:?})", self.name, key, range);

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.map(|r| r.to_header()))
            .send()
            .await
            .map_err(|err| self.classify(bucket, key, range, err))?;

        // Ranged responses report the range length; the full size lives in
        // Content-Range ("bytes 0-99/1000").
        let size = output
            .content_range()
            .and_then(|r| r.rsplit('/').next())
            .and_then(|total| total.parse::<i64>().ok())
            .or(output.content_length());

        let metadata = Self::descriptor(key, size, output.e_tag(), output.last_modified());

        let name = self.name.clone();
        let mut body = output.body;
        let stream = async_stream::stream! {
            while let Some(chunk) = body.next().await {
                yield chunk.map_err(|e| {
                    tracing::warn!("[{}] Failed to read object chunk: {}", name, e);
                    StoreError::Transient(format!("failed to read object body: {}", e))
                });
            }
        };

        Ok((Box::pin(stream), metadata))
    }
}
