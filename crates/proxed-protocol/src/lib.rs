pub mod sse;

pub use sse::{SseFrame, SseFrameParser};
