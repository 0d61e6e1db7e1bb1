//! HTTP request handlers.

mod misc;
mod sessions;
mod workspace;

pub use misc::*;
pub use sessions::*;
pub use workspace::*;
