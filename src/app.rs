//! HTTP surface: the Twilio webhook plus the session API.

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::channels::webhook_routes;
use crate::sessions::Dispatcher;
use crate::sessions::routes::session_routes;

/// Build the full application router.
pub fn build_router(dispatcher: Dispatcher) -> Router {
    webhook_routes(dispatcher.clone())
        .merge(session_routes(dispatcher))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::channels::{LogSender, OutboundResponder};
    use crate::config::BotConfig;
    use crate::error::GenerationError;
    use crate::generation::GenerationGateway;
    use crate::publisher::StorePublisher;
    use crate::sessions::Workflow;
    use crate::sessions::model::{DetectedFeatures, GeneratedContent, Location, PoiScores};
    use crate::store::{Database, LibSqlBackend};

    struct Offline;

    #[async_trait]
    impl GenerationGateway for Offline {
        async fn draft_listing(
            &self,
            _images: &[String],
            _location: &Location,
            _features: Option<&DetectedFeatures>,
        ) -> Result<GeneratedContent, GenerationError> {
            Err(GenerationError::Timeout {
                service: "drafter".into(),
                timeout: Duration::from_secs(1),
            })
        }

        async fn score_location(&self, _location: &Location) -> Result<PoiScores, GenerationError> {
            Err(GenerationError::Timeout {
                service: "scorer".into(),
                timeout: Duration::from_secs(1),
            })
        }
    }

    async fn router() -> Router {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        build_router(Dispatcher::new(Workflow {
            db: Arc::clone(&db),
            gateway: Arc::new(Offline),
            publisher: Arc::new(StorePublisher::new(db)),
            responder: OutboundResponder::new(Arc::new(LogSender), Duration::ZERO),
            config: BotConfig::default(),
        }))
    }

    #[tokio::test]
    async fn health_route_is_mounted() {
        let resp = router()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_acknowledges_garbage() {
        let resp = router()
            .await
            .oneshot(
                Request::post("/webhook/twilio")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("Body=hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/xml");
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let uri = format!("/api/sessions/{}", uuid::Uuid::new_v4());
        let resp = router()
            .await
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
