pub mod core;
pub mod marks;
pub mod promotion;
pub mod setup;
pub mod students;
