//! Jobs installed at start-up

use tracing::info;

/// Id of the sample job
pub const SAMPLE_JOB_ID: &str = "sample_job";

/// Sample job, only logs that it ran
pub async fn sample_job() {
    info!("Running sample scheduled job");
}
