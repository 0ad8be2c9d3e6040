pub mod clock;
pub mod sync;
