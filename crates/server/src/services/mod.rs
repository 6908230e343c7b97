pub mod feed;
pub mod storage;
pub mod typing;
