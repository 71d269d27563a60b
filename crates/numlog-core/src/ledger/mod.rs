mod interface;
mod lock;
mod sharded;

pub use interface::*;
pub use lock::*;
pub use sharded::*;
