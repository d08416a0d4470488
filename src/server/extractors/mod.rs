mod known_channel_extractor;

pub use known_channel_extractor::*;
