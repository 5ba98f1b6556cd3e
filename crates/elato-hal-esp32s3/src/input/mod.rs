pub mod button;
pub mod touch;
