pub mod builder;
pub mod config;
pub mod detect;
pub mod fingerprint;
pub mod history;
pub mod load;
pub mod metadata;
pub mod progress;
pub mod project;
pub mod resolve;
pub mod run;
pub mod vcs;
pub mod version;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
