//! Repository implementations for database operations

pub mod breakouts;
pub mod features;
pub mod observations;
pub mod runs;
pub mod summary;

pub use breakouts::*;
pub use features::*;
pub use observations::*;
pub use runs::*;
pub use summary::*;
