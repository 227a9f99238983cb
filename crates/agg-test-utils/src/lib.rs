// agg-test-utils: Mock servers and wire builders for aggregator tests.

pub mod mock_ndgr_server;
pub mod mock_signaling_server;
pub mod wire;

pub use mock_ndgr_server::{MockNdgrServer, MockResponse};
pub use mock_signaling_server::{MockSignalingServer, SignalingScript};
