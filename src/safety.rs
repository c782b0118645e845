//! Content-safety gate.
//!
//! Screens assembled images through the external classifier before an
//! unverified request may publish. Verified users and dry runs bypass the
//! gate entirely; that decision belongs to the publishing loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::discord::AlertChannel;
use crate::error::{Error, Result};
use crate::types::Request;

pub(crate) trait SafetyClassifier {
    /// Per-category disallowed-content probabilities for one image.
    fn score(&self, image: &Path) -> Result<HashMap<String, f32>>;
}

/// Posts each image to a scoring endpoint that answers with a
/// `{"category": probability}` map.
pub(crate) struct HttpClassifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpClassifier {
    pub(crate) fn new(url: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            url,
        }
    }
}

impl SafetyClassifier for HttpClassifier {
    fn score(&self, image: &Path) -> Result<HashMap<String, f32>> {
        let bytes = std::fs::read(image)?;
        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "frame.jpg".to_string());
        let form = reqwest::blocking::multipart::Form::new().part(
            "image",
            reqwest::blocking::multipart::Part::bytes(bytes)
                .file_name(name)
                .mime_str("image/jpeg")
                .map_err(|e| Error::Http(e.to_string()))?,
        );
        let response = self.client.post(&self.url).multipart(form).send()?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "classifier returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(response.json()?)
    }
}

/// Stand-in when no classifier endpoint is configured: nothing ever trips.
pub(crate) struct DisabledClassifier;

impl SafetyClassifier for DisabledClassifier {
    fn score(&self, _image: &Path) -> Result<HashMap<String, f32>> {
        Ok(HashMap::new())
    }
}

/// Screen the saved images. On a trip the operator channel gets exactly one
/// alert carrying the offending images and the requester, and the request is
/// terminally rejected.
pub(crate) fn gate(
    classifier: &dyn SafetyClassifier,
    alerts: &dyn AlertChannel,
    request: &Request,
    paths: &[PathBuf],
    threshold: f32,
) -> Result<()> {
    let mut offending: Vec<PathBuf> = Vec::new();
    let mut worst: Option<(String, f32)> = None;
    for path in paths {
        let scores = classifier.score(path)?;
        let tripped = scores.iter().filter(|(_, s)| **s > threshold);
        let mut hit = false;
        for (category, score) in tripped {
            hit = true;
            if worst.as_ref().is_none_or(|(_, s)| score > s) {
                worst = Some((category.clone(), *score));
            }
        }
        if hit {
            offending.push(path.clone());
        }
    }

    if let Some((category, score)) = worst {
        tracing::warn!(
            request = %request.id,
            user = %request.user,
            category = %category,
            score,
            "safety gate tripped"
        );
        alerts.send(
            &format!(
                "NSFW request rejected: {category} scored {score:.2} for {} (request {} by {})",
                request.movie, request.id, request.user
            ),
            &offending,
        );
        return Err(Error::NsfwContent);
    }
    Ok(())
}
