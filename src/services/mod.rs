//! Services built on the MPD client (playcount tracking)

pub mod handle;
pub mod playcount;
pub mod traits;

pub use handle::ServiceHandle;
pub use playcount::{PlaycountService, PlaycountSettings, SongTracker};
pub use traits::{Service, ServiceContext};
