pub use cell::*;
pub use dimers::*;
pub use fragment::*;

pub mod cell;
pub mod dimers;
pub mod fragment;
