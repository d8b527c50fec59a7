pub mod backend;
pub mod mram;
pub mod protocol;
pub mod storage;
