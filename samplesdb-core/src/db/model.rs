pub mod attachment;
pub mod collection;
pub mod sample;
pub mod user;
pub mod verification;
