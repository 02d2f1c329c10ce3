//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fakes;
pub mod fixtures;
pub mod recorder;

#[allow(unused_imports)]
pub use fakes::{generated_image, FakeAi, MemoryStore};
#[allow(unused_imports)]
pub use fixtures::TestEnv;
#[allow(unused_imports)]
pub use recorder::{RecordingMessenger, Sent};
