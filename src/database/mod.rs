pub mod channel;
pub mod channel_file;

pub use channel_file::ChannelFile;
