pub use blocks::*;
pub use degeneracy::*;
pub use frame::*;
pub use trajectory::*;

pub mod blocks;
pub mod degeneracy;
pub mod frame;
pub mod trajectory;
