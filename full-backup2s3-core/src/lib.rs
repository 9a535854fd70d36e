#![doc = "full-backup2s3-core: core logic library for full-backup2s3."]

//! This crate contains the data models, trait seams and orchestration for the
//! backup -> upload -> report job. The AWS SDK client lives in the CLI crate;
//! everything here is driven through the traits in [`contract`].
//!
//! # Usage
//! Add this as a dependency for anything that needs to run or test the backup pipeline.

pub mod backup;
pub mod checksum;
pub mod config;
pub mod contract;
pub mod monitoring;
pub mod pipeline;
pub mod process;
pub mod upload;
