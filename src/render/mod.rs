//! The rendering engine: browser lifecycle, readiness protocol, and the
//! post-render HTML optimizer (§4.4/§4.5).

mod engine;
mod optimizer;
mod readiness;

pub use engine::{RenderEngine, RenderRequest, Renderer};
pub use optimizer::optimize;
