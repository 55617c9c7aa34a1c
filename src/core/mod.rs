pub mod adaptive;
pub mod job;
pub mod partition;
pub mod rdd;

pub use adaptive::*;
pub use job::*;
pub use partition::*;
pub use rdd::*;
