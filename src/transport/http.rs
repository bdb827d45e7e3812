use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::client::Publish;
use crate::transport::message::{PublishRequest, Reply};

pub type SharedPublisher = Arc<dyn Publish>;

pub fn router(publisher: SharedPublisher) -> Router {
    Router::new()
        .route("/publish", post(handle_publish))
        .with_state(publisher)
}

async fn handle_publish(
    State(publisher): State<SharedPublisher>,
    request: Result<Json<PublishRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            warn!(%rejection, "rejected publish request");
            return Reply::InvalidRequest;
        }
    };

    match publisher.publish(&request.message).await {
        Ok(()) => Reply::Published,
        Err(e) => {
            error!("Failed to publish message: {e}");
            Reply::PublishFailed
        }
    }
}

/// Serves `router` until `stop` is cancelled, then lets in-flight requests
/// finish. Bounding that drain is up to the caller.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    stop: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
}
