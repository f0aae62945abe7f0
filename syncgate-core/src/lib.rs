pub mod api_upload;
pub mod batch;
pub mod batch_upload;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod localize;
pub mod manifest;
pub mod operator;
pub mod path_convention;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod runlog;
pub mod split;
