//! Multipart form upload.

use super::SequentialTransport;
use super::exchange::{map_reqwest_error, read_response};
use crate::classifier::classify;
use crate::error::{Result, TransportError};
use crate::request::ConnectionStyle;
use crate::response::ResponseWrapper;
use http::Method;
use http::header::CONTENT_TYPE;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

/// Files are streamed in chunks of this many bytes.
pub const UPLOAD_CHUNK_SIZE: usize = 1024;

/// Content type sent for a file, chosen by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg" | "jpe") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

impl SequentialTransport {
    /// Upload text fields and files as `multipart/form-data` with POST.
    ///
    /// Uploads are not retried since a streamed body cannot be replayed.
    pub async fn form_upload_by_post(
        &self,
        url: &str,
        text_fields: &[(&str, &str)],
        file_fields: &[(&str, &Path)],
    ) -> Result<ResponseWrapper> {
        self.form_upload(Method::POST, url, text_fields, file_fields)
            .await
    }

    /// Upload text fields and files as `multipart/form-data` with PUT.
    pub async fn form_upload_by_put(
        &self,
        url: &str,
        text_fields: &[(&str, &str)],
        file_fields: &[(&str, &Path)],
    ) -> Result<ResponseWrapper> {
        self.form_upload(Method::PUT, url, text_fields, file_fields)
            .await
    }

    async fn form_upload(
        &self,
        method: Method,
        url: &str,
        text_fields: &[(&str, &str)],
        file_fields: &[(&str, &Path)],
    ) -> Result<ResponseWrapper> {
        let url = Url::parse(url)?;

        let mut form = Form::new();
        debug!(boundary = form.boundary(), "Uploading multipart form to {}", url);

        for (name, value) in text_fields {
            form = form.text(name.to_string(), value.to_string());
        }

        for (name, path) in file_fields {
            let file = tokio::fs::File::open(path).await?;
            let length = file.metadata().await?.len();
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let stream = ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE);
            let part = Part::stream_with_length(Body::wrap_stream(stream), length)
                .file_name(file_name)
                .mime_str(content_type_for(path))
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            form = form.part(name.to_string(), part);
        }

        let mut headers = self
            .headers()
            .to_header_map(ConnectionStyle::Sequential, None)?;
        headers.remove(CONTENT_TYPE);

        let response = self
            .client()
            .request(method, url)
            .headers(headers)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let raw = read_response(response).await?;

        classify(raw.status, raw.body, &raw.headers).into_result()
    }
}
