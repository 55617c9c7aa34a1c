#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod core;
pub mod index;
pub mod mapper;
pub mod stats;
pub mod storage;
pub mod tool;
pub mod verify;
