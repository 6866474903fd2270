//! External collaborators: blob storage for match videos and the video
//! scoring oracle.

pub mod scoring;
pub mod signing;
pub mod storage;
