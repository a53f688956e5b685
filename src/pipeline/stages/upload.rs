//! Multipart upload handler.
//!
//! Claims `multipart/form-data` bodies. File parts become the [`Uploads`]
//! attribute; text parts become [`RequestBody::Form`]. Where the files end up
//! is the collaborator's business. Dropping the request (client disconnect)
//! cancels the read.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart};
use axum::http::{Request, StatusCode};
use bytes::Bytes;

use crate::error::Error;
use crate::pipeline::{Flow, RequestBody, RequestContext, Stage};

/// One uploaded file, held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Extension of the original file name, including the dot.
    pub fn extension(&self) -> Option<&str> {
        self.file_name.rfind('.').map(|i| &self.file_name[i..])
    }
}

/// Files uploaded with the request.
#[derive(Debug, Clone, Default)]
pub struct Uploads(pub Vec<UploadedFile>);

impl Uploads {
    pub fn get(&self, field: &str) -> Option<&UploadedFile> {
        self.0.iter().find(|f| f.field == field)
    }
}

#[derive(Debug)]
pub struct UploadHandler {
    limit: usize,
}

impl UploadHandler {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    fn map_multipart_error(&self, status: StatusCode, message: String) -> Error {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge { limit: self.limit }
        } else {
            Error::InvalidBody(message)
        }
    }

    async fn read(&self, ctx: &mut RequestContext, body: Body) -> Result<(), Error> {
        let bytes = super::body_parser::read_limited(body, self.limit).await?;

        let mut builder = Request::builder().method(ctx.method.clone()).uri("/");
        if let Some(headers) = builder.headers_mut() {
            headers.extend(ctx.headers.clone());
        }
        let mut request = builder
            .body(Body::from(bytes))
            .map_err(|e| Error::Internal(e.to_string()))?;
        // Carries the server's body limit through to the multipart reader.
        *request.extensions_mut() = ctx.attributes.to_extensions();

        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| Error::InvalidBody(rejection.body_text()))?;

        let mut files = Vec::new();
        let mut fields = serde_json::Map::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| self.map_multipart_error(e.status(), e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(String::from);
            let content_type = field.content_type().map(String::from);

            match file_name {
                Some(file_name) => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| self.map_multipart_error(e.status(), e.body_text()))?;
                    files.push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        data,
                    });
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| self.map_multipart_error(e.status(), e.body_text()))?;
                    fields.insert(name, serde_json::Value::String(text));
                }
            }
        }

        tracing::debug!(files = files.len(), fields = fields.len(), "multipart body parsed");

        ctx.body = RequestBody::Form(fields);
        ctx.attributes.attach(Uploads(files))
    }
}

#[async_trait]
impl Stage for UploadHandler {
    fn name(&self) -> &str {
        "upload-handler"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if ctx.content_type().as_deref() != Some("multipart/form-data") {
            return Flow::Continue;
        }

        let RequestBody::Unread(body) = ctx.body.take() else {
            return Flow::Continue;
        };

        match self.read(ctx, body).await {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, Method};

    const BOUNDARY: &str = "X-DEVCAMPER-BOUNDARY";

    fn multipart_request(body: String) -> RequestContext {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/api/v1/bootcamps/abc/photo")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        RequestContext::from_request(request, None)
    }

    fn sample_body() -> String {
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"caption\"\r\n\r\n\
             campus photo\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"campus.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             JPEGDATA\r\n\
             --{BOUNDARY}--\r\n"
        )
    }

    #[tokio::test]
    async fn splits_files_and_fields() {
        let mut ctx = multipart_request(sample_body());
        let flow = UploadHandler::new(1024 * 1024).handle(&mut ctx).await;
        assert!(matches!(flow, Flow::Continue), "{flow:?}");

        let uploads = ctx.attributes.get::<Uploads>().unwrap();
        let file = uploads.get("file").unwrap();
        assert_eq!(file.file_name, "campus.jpg");
        assert_eq!(file.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(file.extension(), Some(".jpg"));
        assert_eq!(&file.data[..], b"JPEGDATA");

        match &ctx.body {
            RequestBody::Form(fields) => assert_eq!(fields["caption"], "campus photo"),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_upload_fails() {
        let mut ctx = multipart_request(sample_body());
        let flow = UploadHandler::new(16).handle(&mut ctx).await;
        assert!(matches!(flow, Flow::Fail(Error::PayloadTooLarge { limit: 16 })));
    }

    #[tokio::test]
    async fn non_multipart_is_ignored() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        UploadHandler::new(1024).handle(&mut ctx).await;
        assert!(!ctx.attributes.contains::<Uploads>());
    }
}
