pub mod adapter;
pub mod constraint;
pub mod geometry;
pub mod solver;
pub mod system;

pub fn version() -> &'static str {
    "0.1.0"
}
