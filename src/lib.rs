// Library exports for the binary and integration tests

pub mod accuraterip;
pub mod cd;
pub mod config;
pub mod musicbrainz;
pub mod rip;

// Test support (only available with test-utils feature)
#[cfg(feature = "test-utils")]
pub mod test_support;
