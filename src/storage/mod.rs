pub mod driver;
pub mod memory;
pub mod s3;
