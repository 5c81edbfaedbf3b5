//! Downstream delivery: submission and job tracking.

pub mod client;
pub mod tracker;
pub mod types;

pub use client::{DeliveryClient, HttpDeliveryClient, is_valid_job_id};
pub use tracker::{JobTracker, TrackingOutcome, TrackingReport};
pub use types::{JobStatus, JobStatusResponse, SubmissionJob, SubmitRequest, SubmitResponse};
