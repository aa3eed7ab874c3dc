// test-support: shared test utilities for exercising the event hub.
//
// Mirrors the reference repo's rt-test-utils crate: a mock backend and a
// mock WS client, kept out of the core's own dependency tree and pulled in
// only as a dev-dependency by the core and its integration tests.

pub mod mock_backend;
pub mod mock_ws_client;

pub use mock_backend::{MockBackendClient, Outcome};
pub use mock_ws_client::MockWsClient;
