#[cfg(not(feature = "loom"))]
mod basic_tests;
#[cfg(not(feature = "loom"))]
mod lifecycle_tests;
