pub use crate::logging::hostname;
pub use haloblur_core::prelude::*;
