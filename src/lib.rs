pub mod cameras;
pub mod fusion;
pub mod geometry;
pub mod io;
pub mod markers;
pub mod objects;
pub mod postprocess;
pub mod system;
