use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbedConfig;
use crate::embed::{BoundingBox, LogoEmbedder};
use crate::error::EmbedError;

/// HttpEmbedder calls a remote embedding service over HTTP.
///
/// The service receives `POST {base_url}/embed` with the image URL and crop
/// box, performs cropping and model inference, and responds with
/// `{"embedding": [...]}`.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    dim: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    image_url: &'a str,
    bounding_box: BoundingBox,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(cfg: EmbedConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key,
            dim: cfg.dimension,
        }
    }
}

#[async_trait::async_trait]
impl LogoEmbedder for HttpEmbedder {
    async fn embed(&self, image_url: &str, bbox: &BoundingBox) -> Result<Vec<f32>, EmbedError> {
        bbox.validate()?;

        let url = format!("{}/embed", self.base_url);
        let mut req = self.client.post(&url).json(&EmbedRequest {
            image_url,
            bounding_box: *bbox,
        });
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EmbedError::Api(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api(format!("{status}: {body}")));
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::BadResponse(e.to_string()))?;

        if self.dim != 0 && parsed.embedding.len() != self.dim {
            return Err(EmbedError::WrongDimension {
                got: parsed.embedding.len(),
                want: self.dim,
            });
        }
        Ok(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parse() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"embedding": [0.1, 0.2, 0.3]}"#).unwrap();
        assert_eq!(parsed.embedding.len(), 3);
    }

    #[test]
    fn test_request_shape() {
        let req = EmbedRequest {
            image_url: "https://img.example/1.jpg",
            bounding_box: BoundingBox {
                y_min: 0.0,
                x_min: 0.0,
                y_max: 1.0,
                x_max: 1.0,
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["image_url"], "https://img.example/1.jpg");
        assert_eq!(v["bounding_box"]["y_max"], 1.0);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let e = HttpEmbedder::new(EmbedConfig {
            base_url: "http://localhost:9090/".into(),
            api_key: String::new(),
            dimension: 4,
        });
        assert_eq!(e.base_url, "http://localhost:9090");
        assert_eq!(e.dimension(), 4);
    }
}
