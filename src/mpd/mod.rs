//! MPD protocol client: line transport, command client and idle notifications

pub mod client;
pub mod error;
pub mod idle;
pub mod info;
pub mod transport;

pub use client::{Mode, MpdClient, STICKER_SONG_TYPE};
pub use error::MpdError;
pub use idle::IdleWatcher;
pub use info::{ChannelMessage, Info, PlayState};
pub use transport::{CommandId, Connection};
