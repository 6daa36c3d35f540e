use std::time::Duration;

use anyhow::Context;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    BoxFuture, KeyValue, ProvisioningRequest, RemoteError, StackDescriptor, StackHandle,
    StackService,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`StackService`] speaking JSON over HTTP.
///
/// `GET /stacks` lists, `POST /stacks` creates and `PUT /stacks/{name}`
/// updates. A `409` answer is reported as [`RemoteError::Conflict`].
#[derive(Debug, Clone)]
pub struct HttpStackService {
    base: Url,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct StackRequestBody<'a> {
    name: &'a str,
    template_body: &'a str,
    parameters: Vec<KeyValue>,
    tags: Vec<KeyValue>,
}

impl<'a> From<&'a ProvisioningRequest> for StackRequestBody<'a> {
    fn from(req: &'a ProvisioningRequest) -> Self {
        Self {
            name: &req.name,
            template_body: &req.template_body,
            parameters: req.parameter_list(),
            tags: req.tag_list(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListStacksResponse {
    #[serde(default)]
    stacks: Vec<StackDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl HttpStackService {
    pub fn try_new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("parse stack api url {base_url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("stack api url cannot be a base: {base_url}");
        }
        let client = reqwest::Client::builder()
            .user_agent(crate::version::user_agent())
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .context("build reqwest client")?;
        Ok(Self { base, client })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn submit(
        &self,
        method: reqwest::Method,
        url: Url,
        req: &ProvisioningRequest,
    ) -> Result<StackHandle, RemoteError> {
        debug!(%method, %url, stack = %req.name, "submitting stack request");
        let resp = self
            .client
            .request(method, url)
            .json(&StackRequestBody::from(req))
            .send()
            .await
            .map_err(send_error)?;
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        resp.json::<StackHandle>().await.map_err(body_error)
    }
}

impl StackService for HttpStackService {
    fn list_stacks(&self) -> BoxFuture<'_, Result<Vec<StackDescriptor>, RemoteError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.url(&["stacks"]))
                .send()
                .await
                .map_err(send_error)?;
            if !resp.status().is_success() {
                return Err(rejection(resp).await);
            }
            let body = resp
                .json::<ListStacksResponse>()
                .await
                .map_err(body_error)?;
            Ok(body.stacks)
        })
    }

    fn create_stack(
        &self,
        req: ProvisioningRequest,
    ) -> BoxFuture<'_, Result<StackHandle, RemoteError>> {
        Box::pin(async move {
            self.submit(reqwest::Method::POST, self.url(&["stacks"]), &req)
                .await
        })
    }

    fn update_stack(
        &self,
        req: ProvisioningRequest,
    ) -> BoxFuture<'_, Result<StackHandle, RemoteError>> {
        Box::pin(async move {
            let url = self.url(&["stacks", req.name.as_str()]);
            self.submit(reqwest::Method::PUT, url, &req).await
        })
    }
}

fn send_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(err.to_string())
    }
}

fn body_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Decode(err.to_string())
    }
}

async fn rejection(resp: reqwest::Response) -> RemoteError {
    let status = resp.status();
    let text = match resp.text().await {
        Ok(text) => text,
        Err(err) => {
            debug!(%status, error = %err, "failed to read error response body");
            format!("unreadable response body: {err}")
        }
    };
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .map(|body| body.message)
        .filter(|m| !m.is_empty())
        .unwrap_or(text);
    if status == StatusCode::CONFLICT {
        RemoteError::Conflict { message }
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(name: &str, subnet: &str) -> ProvisioningRequest {
        ProvisioningRequest {
            name: name.to_string(),
            template_body: "{}".to_string(),
            parameters: BTreeMap::from([("Size".to_string(), "2".to_string())]),
            tags: BTreeMap::from([
                ("subnet".to_string(), subnet.to_string()),
                ("type".to_string(), "app".to_string()),
            ]),
        }
    }

    fn service(server: &MockServer) -> HttpStackService {
        HttpStackService::try_new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn list_stacks_decodes_descriptors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stacks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stacks": [
                    {
                        "name": "web",
                        "status": "CREATE_COMPLETE",
                        "tags": [
                            { "key": "type", "value": "app" },
                            { "key": "subnet", "value": "10.0.1.0/24" }
                        ]
                    },
                    { "name": "db" }
                ]
            })))
            .mount(&server)
            .await;

        let stacks = service(&server).list_stacks().await.unwrap();
        assert_eq!(stacks.len(), 2);
        assert_eq!(stacks[0].reserved_subnet(), Some("10.0.1.0/24"));
        assert_eq!(stacks[1].status, "");
    }

    #[tokio::test]
    async fn create_stack_posts_parameters_and_tags() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stacks"))
            .and(body_json(serde_json::json!({
                "name": "web",
                "template_body": "{}",
                "parameters": [{ "key": "Size", "value": "2" }],
                "tags": [
                    { "key": "subnet", "value": "10.0.3.0/24" },
                    { "key": "type", "value": "app" }
                ]
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({ "stack_id": "stk-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let handle = service(&server)
            .create_stack(request("web", "10.0.3.0/24"))
            .await
            .unwrap();
        assert_eq!(handle.stack_id, "stk-1");
    }

    #[tokio::test]
    async fn update_stack_puts_to_named_path() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/stacks/web"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "stack_id": "stk-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let handle = service(&server)
            .update_stack(request("web", "10.0.3.0/24"))
            .await
            .unwrap();
        assert_eq!(handle.stack_id, "stk-1");
    }

    #[tokio::test]
    async fn conflict_maps_to_conflict_with_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stacks"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "message": "tag subnet=10.0.5.0/24 already in use"
            })))
            .mount(&server)
            .await;

        let err = service(&server)
            .create_stack(request("web", "10.0.5.0/24"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Conflict {
                message: "tag subnet=10.0.5.0/24 already in use".to_string()
            }
        );
    }

    #[tokio::test]
    async fn other_failures_map_to_rejected_with_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stacks"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = service(&server).list_stacks().await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::Rejected {
                status: 503,
                message: "maintenance".to_string()
            }
        );
    }

    #[tokio::test]
    async fn slow_service_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stacks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "stacks": [] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let svc = HttpStackService::try_new(&server.uri(), Duration::from_millis(100)).unwrap();
        assert_eq!(svc.list_stacks().await.unwrap_err(), RemoteError::Timeout);
    }

    #[tokio::test]
    async fn malformed_body_maps_to_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stacks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = service(&server).list_stacks().await.unwrap_err();
        assert!(matches!(err, RemoteError::Decode(_)));
    }

    /// Answers one request with `head` followed by a body cut short of its
    /// declared length.
    async fn truncating_server(head: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                req.extend_from_slice(&buf[..n]);
                let Some(end) = req.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let headers = String::from_utf8_lossy(&req[..end]).to_ascii_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if req.len() >= end + 4 + body_len {
                    break;
                }
            }
            sock.write_all(head.as_bytes()).await.unwrap();
            sock.write_all(b"{\"message\": \"cut").await.unwrap();
            sock.shutdown().await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn unreadable_error_body_is_reported_in_message() {
        let addr =
            truncating_server("HTTP/1.1 409 Conflict\r\ncontent-length: 256\r\n\r\n").await;
        let svc = HttpStackService::try_new(&format!("http://{addr}"), Duration::from_secs(5))
            .unwrap();

        let err = svc
            .create_stack(request("web", "10.0.5.0/24"))
            .await
            .unwrap_err();
        match err {
            RemoteError::Conflict { message } => {
                assert!(message.starts_with("unreadable response body"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn url_appends_segments_to_base_path() {
        let svc =
            HttpStackService::try_new("http://127.0.0.1:9090/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            svc.url(&["stacks", "web"]).as_str(),
            "http://127.0.0.1:9090/api/stacks/web"
        );
        assert!(HttpStackService::try_new("not a url", Duration::from_secs(1)).is_err());
    }
}
