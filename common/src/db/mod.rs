pub mod board;
pub mod indices;
pub mod rules;
