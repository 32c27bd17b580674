pub mod buffer;
pub mod clock;
pub mod report;
