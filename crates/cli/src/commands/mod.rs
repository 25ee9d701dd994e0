pub mod backends;
pub mod build;
pub mod export;
pub mod inspect;
pub mod resolve;
pub mod util;

pub use backends::*;
pub use build::*;
pub use export::*;
pub use inspect::*;
pub use resolve::*;
pub use util::*;
