pub mod codec;

pub use self::codec::{SseFrame, SseFrameDecoder};
