pub mod buffer;
pub mod errors;
pub mod experiment;
pub mod handle;

pub use buffer::*;
pub use errors::*;
pub use experiment::*;
pub use handle::*;
