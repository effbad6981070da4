mod error;
mod file;
mod interface;
mod memory;

pub use error::*;
pub use file::*;
pub use interface::*;
pub use memory::*;
