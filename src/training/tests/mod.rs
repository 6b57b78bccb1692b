//! Shared test support for the training pipeline
//!
//! Fixtures build tiny on-disk image datasets; the cross-module tests here
//! exercise checkpointing together with the loader and the epoch runner.
