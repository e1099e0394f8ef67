pub mod clock;
pub mod codec;
pub mod error;
pub mod guid;

pub use clock::{Clock, FakeClock, SystemClock};
pub use codec::{Codec, Format};
pub use error::{DbError, Result};
pub use guid::{GuidProvider, SequentialGuidProvider, UuidGuidProvider};
