#![doc = "Azure Blob Storage client: the concrete `BlobStore` used by the CLI."]
//
//! # Azure Blob client (CLI <-> Core)
//!
//! This module wires the [`BlobStore`] trait from `blobpush-core` to the Azure
//! Blob service REST API. Only the two operations the uploader needs exist:
//! creating a container and putting a block blob in a single request.
//!
//! - Authentication is Shared Key: every request is signed with HMAC-SHA256
//!   over the canonical request, using the base64-decoded account key.
//! - The endpoint defaults to `https://<account>.blob.core.windows.net`; any
//!   other base URL (Azurite, sovereign clouds) can be configured.
//! - Transport, status and service error codes are mapped onto
//!   [`StorageError`] so the orchestrator can log and count them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, IF_NONE_MATCH,
};
use reqwest::{Body, Method, StatusCode, Url};
use serde::Deserialize;
use sha2::Sha256;
use tokio_util::io::ReaderStream;

use blobpush_core::config::AccountCredentials;
use blobpush_core::contract::{BlobStore, BlobUpload, ContainerStatus, StorageError};
use blobpush_core::UploadError;

type HmacSha256 = Hmac<Sha256>;

/// Storage service REST version sent with every request.
pub const API_VERSION: &str = "2021-08-06";

/// Azure Blob service client authenticated with an account key.
pub struct AzureBlobClient {
    http: reqwest::Client,
    endpoint: Url,
    account: String,
    key: Vec<u8>,
}

impl AzureBlobClient {
    /// Builds a client for the account; `endpoint` overrides the public cloud URL.
    pub fn new(
        credentials: &AccountCredentials,
        endpoint: Option<&str>,
    ) -> Result<Self, UploadError> {
        let key = BASE64.decode(credentials.key.trim()).map_err(|e| {
            UploadError::Configuration(format!("storage account key is not valid base64: {e}"))
        })?;

        let raw_endpoint = match endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", credentials.name),
        };
        let endpoint = Url::parse(&raw_endpoint).map_err(|e| {
            UploadError::Configuration(format!("invalid blob endpoint `{raw_endpoint}`: {e}"))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(UploadError::Configuration(format!(
                "invalid blob endpoint `{raw_endpoint}`: not a base URL"
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("blobpush/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Configuration(format!("cannot build HTTP client: {e}")))?;

        tracing::info!(
            account = %credentials.name,
            endpoint = %endpoint,
            "Initialized Azure blob client"
        );
        Ok(Self {
            http,
            endpoint,
            account: credentials.name.clone(),
            key,
        })
    }

    /// URL of a container, or of a blob inside it when `blob_name` is given.
    fn resource_url(&self, container: &str, blob_name: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(container);
            if let Some(blob) = blob_name {
                segments.extend(blob.split('/'));
            }
        }
        url
    }

    fn sign(&self, string_to_sign: &str) -> Result<String, StorageError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| StorageError::Unauthorized(format!("unusable account key: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn send(
        &self,
        request: CanonicalRequest<'_>,
        body: Body,
    ) -> Result<reqwest::Response, StorageError> {
        let string_to_sign = request.string_to_sign(&self.account);
        let signature = self.sign(&string_to_sign)?;

        let mut headers = HeaderMap::new();
        for (&name, value) in &request.ms_headers {
            headers.insert(HeaderName::from_static(name), header_value(value)?);
        }
        if let Some(etag) = request.if_none_match {
            headers.insert(IF_NONE_MATCH, header_value(etag)?);
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(request.content_length));
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("SharedKey {}:{signature}", self.account))?,
        );

        self.http
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))
    }

    fn base_headers() -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();
        headers.insert("x-ms-client-request-id", uuid::Uuid::new_v4().to_string());
        headers.insert(
            "x-ms-date",
            chrono::Utc::now()
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        );
        headers.insert("x-ms-version", API_VERSION.to_string());
        headers
    }
}

#[async_trait]
impl BlobStore for AzureBlobClient {
    async fn create_container(&self, name: &str) -> Result<ContainerStatus, StorageError> {
        let mut url = self.resource_url(name, None);
        url.query_pairs_mut().append_pair("restype", "container");
        tracing::debug!(container = name, "Creating the container if it doesn't exist...");

        let request = CanonicalRequest {
            method: Method::PUT,
            url: &url,
            content_length: 0,
            if_none_match: None,
            ms_headers: Self::base_headers(),
        };
        let response = self.send(request, Body::from(Vec::new())).await?;

        match response.status() {
            StatusCode::CREATED => {
                tracing::info!(container = name, "Created container");
                Ok(ContainerStatus::Created)
            }
            StatusCode::CONFLICT if error_code(&response) == "ContainerAlreadyExists" => {
                tracing::debug!(container = name, "Container already exists");
                Ok(ContainerStatus::AlreadyExists)
            }
            _ => Err(error_from_response(response, name).await),
        }
    }

    async fn upload_blob(&self, upload: BlobUpload) -> Result<(), StorageError> {
        let url = self.resource_url(&upload.container, Some(&upload.blob_name));

        let mut ms_headers = Self::base_headers();
        ms_headers.insert("x-ms-blob-type", "BlockBlob".to_string());
        if let Some(content_type) = &upload.content_type {
            ms_headers.insert("x-ms-blob-content-type", content_type.clone());
        }

        let request = CanonicalRequest {
            method: Method::PUT,
            url: &url,
            content_length: upload.content_length,
            // without overwrite an existing blob must make the PUT fail
            if_none_match: (!upload.overwrite).then_some("*"),
            ms_headers,
        };
        // the file is streamed, never held in memory as a whole
        let body = Body::wrap_stream(ReaderStream::new(upload.body));
        let response = self.send(request, body).await?;

        if response.status().is_success() {
            tracing::debug!(blob = %upload.blob_name, status = %response.status(), "Blob stored");
            return Ok(());
        }
        Err(error_from_response(response, &upload.blob_name).await)
    }
}

/// The parts of a request that take part in the Shared Key signature.
struct CanonicalRequest<'a> {
    method: Method,
    url: &'a Url,
    content_length: u64,
    if_none_match: Option<&'a str>,
    /// `x-ms-*` headers, kept sorted by name.
    ms_headers: BTreeMap<&'static str, String>,
}

impl CanonicalRequest<'_> {
    fn string_to_sign(&self, account: &str) -> String {
        // Content-Length is signed as an empty string when zero.
        let content_length = if self.content_length == 0 {
            String::new()
        } else {
            self.content_length.to_string()
        };

        let mut out = String::new();
        out.push_str(self.method.as_str());
        out.push('\n');
        // Content-Encoding, Content-Language
        out.push_str("\n\n");
        out.push_str(&content_length);
        out.push('\n');
        // Content-MD5, Content-Type, Date, If-Modified-Since, If-Match
        out.push_str("\n\n\n\n\n");
        out.push_str(self.if_none_match.unwrap_or(""));
        out.push('\n');
        // If-Unmodified-Since, Range
        out.push_str("\n\n");

        for (name, value) in &self.ms_headers {
            out.push_str(name);
            out.push(':');
            out.push_str(value.trim());
            out.push('\n');
        }

        out.push('/');
        out.push_str(account);
        out.push_str(self.url.path());

        let mut query: Vec<(String, String)> = self
            .url
            .query_pairs()
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        query.sort();
        for (name, value) in query {
            out.push('\n');
            out.push_str(&name);
            out.push(':');
            out.push_str(&value);
        }
        out
    }
}

fn header_value(value: &str) -> Result<HeaderValue, StorageError> {
    HeaderValue::from_str(value)
        .map_err(|e| StorageError::Transport(format!("invalid header value `{value}`: {e}")))
}

fn error_code(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn error_from_response(response: reqwest::Response, resource: &str) -> StorageError {
    let status = response.status();
    let header_code = error_code(&response);
    let body = response.text().await.unwrap_or_default();
    let parsed = ServiceError::parse(&body);

    let code = match (header_code.is_empty(), &parsed) {
        (true, Some(ServiceError { code: Some(code), .. })) => code.clone(),
        _ => header_code,
    };
    let message = parsed
        .and_then(|e| e.first_message_line())
        .unwrap_or_else(|| status.to_string());

    tracing::debug!(resource, %status, code = %code, body = %body, "Blob service returned an error");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Unauthorized(message),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED
            if code == "BlobAlreadyExists" || code == "ConditionNotMet" =>
        {
            StorageError::AlreadyExists(resource.to_string())
        }
        _ => StorageError::Http {
            status: status.as_u16(),
            code,
            message,
        },
    }
}

/// XML error body returned by the Blob service (`<Error><Code/><Message/></Error>`).
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct ServiceError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ServiceError {
    fn parse(body: &str) -> Option<Self> {
        let body = body.trim_start_matches('\u{feff}').trim();
        if body.is_empty() {
            return None;
        }
        quick_xml::de::from_str(body).ok()
    }

    /// The message without the `RequestId:`/`Time:` lines the service appends.
    fn first_message_line(&self) -> Option<String> {
        self.message
            .as_deref()?
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}
