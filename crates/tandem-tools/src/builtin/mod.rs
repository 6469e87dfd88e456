pub mod clock;
pub mod diag;
pub mod memory;
