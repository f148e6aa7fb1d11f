pub use io::*;
pub use system::*;
pub use trajectory::*;

pub mod io;
pub mod system;
pub mod trajectory;
