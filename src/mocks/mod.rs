//! Scripted backend doubles.
//!
//! These mocks let tests drive the broker without a live backend. Each one
//! records every call it receives and plays back scripted responses in
//! order; once a script runs dry, management calls replay the last
//! successful listing and the data-plane mocks succeed.

mod management;
mod storage;
mod streaming;

pub use management::MockManagementClient;
pub use storage::{MockStorageClient, QueuePost, Upload};
pub use streaming::{MockStreamingBackend, StreamingCall};
