//! Facebook Graph publish transport.
//!
//! Single stills post straight to the page photo stream; multi-image sets
//! upload each photo unpublished and attach them to one feed post. A
//! credential-level rejection is fatal to the whole run, not just to the
//! request that hit it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};

use crate::error::{Error, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Graph error codes meaning the token itself is bad.
const FATAL_GRAPH_CODES: [i64; 2] = [102, 190];

pub(crate) trait PublishTransport {
    /// Publish the artifact; returns the created post id. `published = false`
    /// creates the post unpublished (Graph scheduling semantics) — the
    /// dry-run mode of the pipeline never calls this at all.
    fn publish_images(&self, paths: &[PathBuf], description: &str, published: bool)
    -> Result<String>;

    /// Comment under a post or under a user's comment thread.
    fn comment(&self, object_id: &str, message: &str, attachment: Option<&Path>) -> Result<()>;
}

pub(crate) struct GraphApi {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

impl GraphApi {
    pub(crate) fn new(base_url: String, token: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            token,
        }
    }

    fn post(&self, path: &str, form: Form) -> Result<serde_json::Value> {
        let form = form.text("access_token", self.token.clone());
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .multipart(form)
            .send()?;
        let status = response.status();
        let body: serde_json::Value = response.json().unwrap_or_default();

        let graph_error = body.get("error");
        if !status.is_success() || graph_error.is_some() {
            let code = graph_error
                .and_then(|e| e.get("code"))
                .and_then(|c| c.as_i64());
            let message = graph_error
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            if status.as_u16() == 401
                || status.as_u16() == 403
                || code.is_some_and(|c| FATAL_GRAPH_CODES.contains(&c))
            {
                return Err(Error::FatalTransport(message));
            }
            return Err(Error::Http(message));
        }
        Ok(body)
    }

    fn image_part(path: &Path) -> Result<Part> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "frame.jpg".to_string());
        Part::bytes(bytes)
            .file_name(name)
            .mime_str("image/jpeg")
            .map_err(|e| Error::Http(e.to_string()))
    }

    fn upload_photo(&self, path: &Path, message: Option<&str>, published: bool) -> Result<String> {
        let mut form = Form::new()
            .part("source", Self::image_part(path)?)
            .text("published", published.to_string());
        if let Some(message) = message {
            form = form.text("message", message.to_string());
        }
        let body = self.post("me/photos", form)?;
        body.get("id")
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| Error::Http("photo upload returned no id".to_string()))
    }
}

impl PublishTransport for GraphApi {
    fn publish_images(
        &self,
        paths: &[PathBuf],
        description: &str,
        published: bool,
    ) -> Result<String> {
        if paths.len() == 1 {
            tracing::info!("posting single image");
            let id = self.upload_photo(&paths[0], Some(description), published)?;
            tracing::info!(post = %id, "posted");
            return Ok(id);
        }

        tracing::info!(count = paths.len(), "posting multi-image set");
        let mut media = Vec::with_capacity(paths.len());
        for path in paths {
            let id = self.upload_photo(path, None, false)?;
            media.push(serde_json::json!({ "media_fbid": id }));
        }
        let form = Form::new()
            .text("attached_media", serde_json::Value::from(media).to_string())
            .text("message", description.to_string())
            .text("published", published.to_string());
        let body = self.post("me/feed", form)?;
        let id = body
            .get("id")
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| Error::Http("feed post returned no id".to_string()))?;
        tracing::info!(post = %id, "posted");
        Ok(id)
    }

    fn comment(&self, object_id: &str, message: &str, attachment: Option<&Path>) -> Result<()> {
        let mut form = Form::new().text("message", message.to_string());
        if let Some(path) = attachment {
            form = form.part("source", Self::image_part(path)?);
        }
        self.post(&format!("{object_id}/comments"), form)?;
        Ok(())
    }
}
