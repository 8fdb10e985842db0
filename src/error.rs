//! Renderer error types.

use crate::backend::BackendError;
use crate::pipeline::FramePhase;
use thiserror::Error;

/// Errors surfaced to the editor by the renderer.
///
/// Per-draw and per-light problems never show up here; they are logged and
/// counted in [`RendererStatistics`](crate::RendererStatistics) instead.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("end_frame called without a matching begin_frame")]
    FrameNotStarted,
    #[error("begin_frame called while a frame is already being recorded")]
    FrameAlreadyStarted,
    #[error("pass order violated: expected {expected:?}, found {found:?}")]
    PassOrder {
        expected: FramePhase,
        found: FramePhase,
    },
    #[error("invalid viewport size {width}x{height}")]
    InvalidViewportSize { width: u32, height: u32 },
    #[error("failed to resize render targets to {width}x{height}: {source}")]
    ResizeFailed {
        width: u32,
        height: u32,
        #[source]
        source: BackendError,
    },
}

pub type RenderResult<T> = Result<T, RenderError>;
