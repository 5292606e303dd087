//! HTTP-backed generation gateway.
//!
//! Each service is a JSON endpoint: the drafter takes images + location +
//! annotations and returns listing text, the scorer takes a location and
//! returns POI scores, the optional detector takes images and returns
//! annotations.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::GenerationGateway;
use crate::config::GatewayConfig;
use crate::error::GenerationError;
use crate::sessions::model::{DetectedFeatures, GeneratedContent, Location, PoiScores};

const DRAFTER: &str = "listing-drafter";
const SCORER: &str = "geo-scorer";
const DETECTOR: &str = "feature-detector";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftRequest<'a> {
    images: &'a [String],
    location: &'a Location,
    detected_features: Option<&'a DetectedFeatures>,
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    location: &'a Location,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    images: &'a [String],
}

/// Generation gateway that calls remote JSON services.
pub struct HttpGenerationGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpGenerationGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::RequestFailed {
                service: "http-client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    async fn post_json<B, T>(&self, service: &str, url: &str, body: &B) -> Result<T, GenerationError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(expose(key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout {
                    service: service.to_string(),
                    timeout: self.config.timeout,
                }
            } else {
                GenerationError::RequestFailed {
                    service: service.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::RequestFailed {
                service: service.to_string(),
                reason: format!("HTTP {status}: {}", truncate(&body, 200)),
            });
        }

        let parsed = response
            .json::<T>()
            .await
            .map_err(|e| GenerationError::InvalidResponse {
                service: service.to_string(),
                reason: e.to_string(),
            })?;
        debug!(service, "Generation service responded");
        Ok(parsed)
    }
}

fn expose(secret: &SecretString) -> &str {
    secret.expose_secret()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl GenerationGateway for HttpGenerationGateway {
    async fn draft_listing(
        &self,
        images: &[String],
        location: &Location,
        detected_features: Option<&DetectedFeatures>,
    ) -> Result<GeneratedContent, GenerationError> {
        let body = DraftRequest {
            images,
            location,
            detected_features,
        };
        let content: GeneratedContent = self
            .post_json(DRAFTER, &self.config.drafter_url, &body)
            .await?;
        if content.title.trim().is_empty() {
            return Err(GenerationError::InvalidResponse {
                service: DRAFTER.to_string(),
                reason: "empty title".to_string(),
            });
        }
        Ok(content)
    }

    async fn score_location(&self, location: &Location) -> Result<PoiScores, GenerationError> {
        self.post_json(SCORER, &self.config.scorer_url, &ScoreRequest { location })
            .await
    }

    async fn detect_features(
        &self,
        images: &[String],
    ) -> Result<Option<DetectedFeatures>, GenerationError> {
        let Some(url) = &self.config.feature_detector_url else {
            return Ok(None);
        };
        let features: DetectedFeatures = self
            .post_json(DETECTOR, url, &DetectRequest { images })
            .await?;
        Ok(Some(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("", 3), "");
    }

    #[test]
    fn draft_request_shape() {
        let location = Location {
            latitude: 13.0,
            longitude: 100.0,
            name: Some("Rawai".into()),
            address: None,
            district: Some("Rawai".into()),
        };
        let images = vec!["https://img/1.jpg".to_string()];
        let body = DraftRequest {
            images: &images,
            location: &location,
            detected_features: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["images"][0], "https://img/1.jpg");
        assert_eq!(json["location"]["district"], "Rawai");
        assert!(json["detectedFeatures"].is_null());
    }

    #[test]
    fn scorer_response_parses_with_defaults() {
        let scores: PoiScores =
            serde_json::from_str(r#"{"overall": 7.5, "categories": {"beach": 9.1}}"#).unwrap();
        assert_eq!(scores.overall, 7.5);
        assert_eq!(scores.categories["beach"], 9.1);
        assert!(scores.highlights.is_empty());
    }

    #[test]
    fn drafter_response_parses_price_as_string() {
        let content: GeneratedContent = serde_json::from_str(
            r#"{"title":"Villa","description":"d","richText":"<p>d</p>","suggestedPrice":"34800000"}"#,
        )
        .unwrap();
        assert_eq!(content.suggested_price.unwrap().to_string(), "34800000");
    }
}
