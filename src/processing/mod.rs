pub mod backend;
pub mod blur;
pub mod compose;
pub mod cpu;
pub mod error;
pub mod gpu;
pub mod hull;
pub mod image;
pub mod lighting;
pub mod palette;
pub mod pipeline;
pub mod reduce;
