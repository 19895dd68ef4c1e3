pub mod benchmark;
pub mod report;
