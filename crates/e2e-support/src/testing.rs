use kube::Client;
use kube::Config;
use wiremock::MockServer;

/// Client talking plain HTTP to a wiremock server standing in for the API server.
pub(crate) fn mock_client(server: &MockServer) -> Client {
    let config = Config::new(server.uri().parse().expect("mock server uri"));
    Client::try_from(config).expect("client for mock server")
}
