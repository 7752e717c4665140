// Input retrieval
//
// - InputFetcher: downloads one remote input into the scratch directory
// - HttpInputFetcher: coordinator-authenticated HTTP implementation

pub mod http;

use async_trait::async_trait;

pub use http::*;

use crate::error::Result;
use crate::job::JobIdentity;
use crate::scratch::ScratchFile;

/// Retrieves a remote resource into a uniquely named local scratch file.
///
/// Implementations must be safe to call concurrently for independent inputs
/// of the same job, and must not leave a partial file behind on failure.
#[async_trait]
pub trait InputFetcher: Send + Sync {
    async fn fetch(&self, url: &str, runner_token: &str, job: &JobIdentity) -> Result<ScratchFile>;
}
