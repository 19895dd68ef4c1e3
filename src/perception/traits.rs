use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::perception::types::{CaptureRequest, Observation, ScreenSize};

/// Capture collaborator: produces the still image the model looks at.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self, request: CaptureRequest) -> PilotResult<Observation>;

    /// Full-resolution size of the captured display in physical pixels.
    fn physical_size(&self) -> PilotResult<ScreenSize>;
}
