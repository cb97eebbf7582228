#![doc = "blobpush-core: core logic library for blobpush."]

//! This crate holds everything blobpush does apart from talking to the network:
//! ignore rules, the upload ledger, directory planning, content-type resolution
//! and the bounded-concurrency upload orchestrator.
//!
//! # Usage
//! Build a [`planner::PathPlanner`], hand it together with a
//! [`contract::BlobStore`] implementation to [`orchestrator::run_uploads`], and
//! inspect the returned [`orchestrator::UploadReport`].

pub mod config;
pub mod contract;
pub mod error;
pub mod ignore;
pub mod ledger;
pub mod mime;
pub mod orchestrator;
pub mod planner;

pub use error::UploadError;
