//! Generation gateway: boundary to the listing drafter and geo/POI scorer.
//!
//! Only called while a session is GENERATING, from a spawned task that holds
//! no session lock.

pub mod http;

pub use http::HttpGenerationGateway;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::sessions::model::{DetectedFeatures, GeneratedContent, Location, PoiScores};

/// External drafting and scoring services.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Draft listing text from the photos, location and any annotations.
    async fn draft_listing(
        &self,
        images: &[String],
        location: &Location,
        detected_features: Option<&DetectedFeatures>,
    ) -> Result<GeneratedContent, GenerationError>;

    /// Score the neighbourhood around `location`.
    async fn score_location(&self, location: &Location) -> Result<PoiScores, GenerationError>;

    /// Annotate the photos. Gateways without a detector return `None`.
    async fn detect_features(
        &self,
        _images: &[String],
    ) -> Result<Option<DetectedFeatures>, GenerationError> {
        Ok(None)
    }
}

/// Everything one successful generation round produces.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub features: Option<DetectedFeatures>,
    pub content: GeneratedContent,
    pub scores: PoiScores,
}

/// Run a full generation round: feature detection, then drafting and scoring
/// concurrently. Any failure fails the whole round.
pub async fn generate(
    gateway: &dyn GenerationGateway,
    images: &[String],
    location: &Location,
) -> Result<GenerationOutput, GenerationError> {
    if images.is_empty() {
        return Err(GenerationError::MissingInput("no images".to_string()));
    }

    // Annotations only enrich the draft; a detector outage is not fatal.
    let features = match gateway.detect_features(images).await {
        Ok(features) => features,
        Err(e) => {
            warn!(error = %e, "Feature detection failed, drafting without annotations");
            None
        }
    };

    let (content, scores) = futures::join!(
        gateway.draft_listing(images, location, features.as_ref()),
        gateway.score_location(location),
    );

    let output = GenerationOutput {
        features,
        content: content?,
        scores: scores?,
    };
    debug!(title = %output.content.title, overall = output.scores.overall, "Generation round complete");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        fail_scorer: bool,
        fail_detector: bool,
        drafts: AtomicUsize,
    }

    #[async_trait]
    impl GenerationGateway for Stub {
        async fn draft_listing(
            &self,
            images: &[String],
            _location: &Location,
            detected_features: Option<&DetectedFeatures>,
        ) -> Result<GeneratedContent, GenerationError> {
            self.drafts.fetch_add(1, Ordering::SeqCst);
            let beds = detected_features.and_then(|f| f.bedrooms).unwrap_or(0);
            Ok(GeneratedContent {
                title: format!("{beds}-bed home, {} photos", images.len()),
                description: "desc".into(),
                rich_text: "<p>desc</p>".into(),
                suggested_price: None,
            })
        }

        async fn score_location(&self, _location: &Location) -> Result<PoiScores, GenerationError> {
            if self.fail_scorer {
                return Err(GenerationError::RequestFailed {
                    service: "scorer".into(),
                    reason: "503".into(),
                });
            }
            Ok(PoiScores {
                overall: 8.0,
                ..Default::default()
            })
        }

        async fn detect_features(
            &self,
            _images: &[String],
        ) -> Result<Option<DetectedFeatures>, GenerationError> {
            if self.fail_detector {
                return Err(GenerationError::RequestFailed {
                    service: "detector".into(),
                    reason: "boom".into(),
                });
            }
            Ok(Some(DetectedFeatures {
                bedrooms: Some(3),
                ..Default::default()
            }))
        }
    }

    fn stub(fail_scorer: bool, fail_detector: bool) -> Stub {
        Stub {
            fail_scorer,
            fail_detector,
            drafts: AtomicUsize::new(0),
        }
    }

    fn location() -> Location {
        Location {
            latitude: 7.77,
            longitude: 98.32,
            name: Some("Rawai".into()),
            address: None,
            district: Some("Rawai".into()),
        }
    }

    #[tokio::test]
    async fn features_feed_the_draft() {
        let gateway = stub(false, false);
        let out = generate(&gateway, &["a".into(), "b".into()], &location())
            .await
            .unwrap();
        assert_eq!(out.content.title, "3-bed home, 2 photos");
        assert_eq!(out.features.unwrap().bedrooms, Some(3));
        assert_eq!(out.scores.overall, 8.0);
    }

    #[tokio::test]
    async fn partial_success_is_failure() {
        let gateway = stub(true, false);
        let result = generate(&gateway, &["a".into()], &location()).await;
        assert!(result.is_err());
        // The drafter still ran; its result is discarded with the round.
        assert_eq!(gateway.drafts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detector_failure_is_tolerated() {
        let gateway = stub(false, true);
        let out = generate(&gateway, &["a".into()], &location()).await.unwrap();
        assert!(out.features.is_none());
        assert_eq!(out.content.title, "0-bed home, 1 photos");
    }

    #[tokio::test]
    async fn no_images_is_rejected_before_any_call() {
        let gateway = stub(false, false);
        let result = generate(&gateway, &[], &location()).await;
        assert!(matches!(result, Err(GenerationError::MissingInput(_))));
        assert_eq!(gateway.drafts.load(Ordering::SeqCst), 0);
    }
}
