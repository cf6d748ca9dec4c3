//! Mock archive host

use dataset_release::DatasetSource;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Start a server answering `GET /<file_name>` with `body`, and a source pointing at it
pub async fn serve_archive(file_name: &str, body: Vec<u8>) -> (MockServer, DatasetSource) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", file_name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(1)
        .mount(&server)
        .await;
    let source = DatasetSource::new(&server.uri(), file_name);
    (server, source)
}
