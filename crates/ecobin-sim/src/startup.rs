//! Broker connection policy at startup.

use ecobin_core::transport::SplitLink;
use ecobin_core::{PublishError, PublisherConfig, TelemetryPublisher};
use tracing::warn;

/// Open the first broker session over `link`.
///
/// When `publish_required` is false a failed first connection yields an
/// offline publisher (state `Failed`, every publish dropped) instead of an
/// error.
pub async fn connect_publisher(
    link: SplitLink,
    config: PublisherConfig,
    publish_required: bool,
) -> Result<TelemetryPublisher, PublishError> {
    match TelemetryPublisher::connect(link, config.clone()).await {
        Ok(publisher) => Ok(publisher),
        Err(e) if !publish_required => {
            warn!(error = %e, "Broker unreachable, running with publishing disabled");
            Ok(TelemetryPublisher::offline(config))
        }
        Err(e) => Err(e),
    }
}
