//! Integration tests for the Quill client
//! These tests run the library against a mock HTTP server rather than mocked transports

mod test_harness;

mod blog_api_test;
mod session_flow_test;
