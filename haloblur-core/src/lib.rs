//! Communication-free building blocks of the distributed blur: grid topology, tile
//! partitioning, convolution kernels and the halo-aware convolution itself.
pub mod accessor;
pub mod convolve;
mod geom;
pub mod kernel;
pub mod partition;
pub mod prelude;
pub mod sample;
pub mod topology;

pub use geom::*;
