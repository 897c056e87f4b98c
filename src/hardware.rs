pub mod cdp186x;
pub mod keymatrix;
pub mod mc682x;

pub use cdp186x::{Cdp186x, Cdp186xType, VideoStep};
pub use keymatrix::KeyMatrix;
pub use mc682x::Mc682x;
