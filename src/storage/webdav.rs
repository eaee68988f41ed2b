use super::{DavResponse, DavTransport, ServerConfig, OP_TIMEOUT_SECS};
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// 基于 reqwest 的 Nextcloud WebDAV 客户端
///
/// `Client` 自带连接池，可以在多个上传任务之间共享。
pub struct WebDavClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    name: String,
}

impl WebDavClient {
    pub fn new(server: &ServerConfig, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, server))
    }

    /// 使用外部构建的 `Client`（自定义代理、证书等）
    pub fn with_client(client: Client, server: &ServerConfig) -> Self {
        let base_url = format!(
            "{}/remote.php/dav/files/{}",
            server.url.trim().trim_end_matches('/'),
            urlencoding::encode(&server.username)
        );
        let name = format!("webdav://{}", base_url);

        Self {
            client,
            base_url,
            username: server.username.clone(),
            password: server.password.clone(),
            name,
        }
    }

    /// 拼接完整 URL，逐段编码
    fn url_for(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();

        if encoded.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, encoded.join("/"))
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url_for(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<DavResponse, TransportError> {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        // 响应体只用于错误信息，读取失败不影响状态判断
        let body = response.text().await.unwrap_or_default();
        Ok(DavResponse::new(status, &body))
    }

    fn method(name: &'static str) -> Result<Method, TransportError> {
        Method::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", name, e)))
    }
}

#[async_trait]
impl DavTransport for WebDavClient {
    async fn probe(&self, path: &str) -> Result<DavResponse, TransportError> {
        debug!("PROPFIND {}", path);
        let builder = self
            .request(Self::method("PROPFIND")?, path)
            .header("Depth", "0");
        self.send(builder).await
    }

    async fn create_folder(&self, path: &str) -> Result<DavResponse, TransportError> {
        debug!("MKCOL {}", path);
        let builder = self.request(Self::method("MKCOL")?, path);
        self.send(builder).await
    }

    async fn upload(
        &self,
        path: &str,
        file: tokio::fs::File,
        size: u64,
    ) -> Result<DavResponse, TransportError> {
        debug!("PUT {} ({} 字节)", path, size);
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let builder = self
            .request(Method::PUT, path)
            .header(CONTENT_LENGTH, size)
            .body(body);
        self.send(builder).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> WebDavClient {
        let server = ServerConfig {
            url: "https://cloud.example.com/".into(),
            username: "ana maria".into(),
            password: "secret".into(),
        };
        WebDavClient::new(&server, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_targets_user_files_root() {
        let c = client();
        assert_eq!(
            c.url_for(""),
            "https://cloud.example.com/remote.php/dav/files/ana%20maria"
        );
        assert_eq!(
            c.url_for("TermuxUploads/2024/03/IMG_0001.jpg"),
            "https://cloud.example.com/remote.php/dav/files/ana%20maria/TermuxUploads/2024/03/IMG_0001.jpg"
        );
    }

    #[test]
    fn url_segments_are_encoded() {
        let c = client();
        assert_eq!(
            c.url_for("/Fotos Viaje//a#b.jpg"),
            "https://cloud.example.com/remote.php/dav/files/ana%20maria/Fotos%20Viaje/a%23b.jpg"
        );
    }

    #[test]
    fn name_includes_endpoint() {
        assert!(client().name().starts_with("webdav://https://cloud.example.com"));
    }

    // ---- 本地 HTTP 桩服务器 ----

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const BASIC_ANA_SECRET: &str = "authorization: basic yw5honnly3jlda==";

    /// 收到的一次请求：请求头（小写）和请求体
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    /// 只应答一次的服务器，`delay` 模拟卡住的服务器
    async fn serve_once(
        status_line: &'static str,
        response_body: &'static str,
        delay: Option<Duration>,
    ) -> (String, JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];

            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before request head");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < head_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                response_body.len(),
                response_body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;

            Captured {
                head,
                body: buf[head_end..].to_vec(),
            }
        });

        (url, handle)
    }

    fn local_client(url: String, timeout: Duration) -> WebDavClient {
        let server = ServerConfig {
            url,
            username: "ana".into(),
            password: "secret".into(),
        };
        let client = Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .unwrap();
        WebDavClient::with_client(client, &server)
    }

    #[tokio::test]
    async fn propfind_sends_depth_zero_with_auth() {
        let (url, server) = serve_once("207 Multi-Status", "<d:multistatus/>", None).await;
        let client = local_client(url, Duration::from_secs(5));

        let response = client.probe("TermuxUploads/2024").await.unwrap();
        assert_eq!(response.status, 207);

        let req = server.await.unwrap();
        assert!(req
            .head
            .starts_with("propfind /remote.php/dav/files/ana/termuxuploads/2024 http/1.1"));
        assert!(req.head.contains("depth: 0"));
        assert!(req.head.contains(BASIC_ANA_SECRET));
    }

    #[tokio::test]
    async fn create_folder_sends_mkcol_and_passes_405_through() {
        let (url, server) = serve_once("405 Method Not Allowed", "", None).await;
        let client = local_client(url, Duration::from_secs(5));

        let response = client.create_folder("Termux Uploads").await.unwrap();
        assert_eq!(response.status, 405);

        let req = server.await.unwrap();
        assert!(req
            .head
            .starts_with("mkcol /remote.php/dav/files/ana/termux%20uploads http/1.1"));
        assert!(req.head.contains(BASIC_ANA_SECRET));
    }

    #[tokio::test]
    async fn upload_streams_file_with_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_0001.jpg");
        std::fs::write(&path, b"hello camera").unwrap();

        let (url, server) = serve_once("201 Created", "", None).await;
        let client = local_client(url, Duration::from_secs(5));

        let file = tokio::fs::File::open(&path).await.unwrap();
        let response = client
            .upload("TermuxUploads/2024/03/IMG_0001.jpg", file, 12)
            .await
            .unwrap();
        assert_eq!(response.status, 201);

        let req = server.await.unwrap();
        assert!(req.head.starts_with(
            "put /remote.php/dav/files/ana/termuxuploads/2024/03/img_0001.jpg http/1.1"
        ));
        assert!(req.head.contains("content-length: 12"));
        assert!(req.head.contains(BASIC_ANA_SECRET));
        assert_eq!(req.body, b"hello camera");
    }

    #[tokio::test]
    async fn error_status_and_body_are_returned() {
        let (url, server) = serve_once("507 Insufficient Storage", "quota exceeded", None).await;
        let client = local_client(url, Duration::from_secs(5));

        let response = client.create_folder("TermuxUploads").await.unwrap();
        assert_eq!(response.status, 507);
        assert_eq!(response.body, "quota exceeded");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn slow_server_maps_to_timeout() {
        let (url, server) =
            serve_once("207 Multi-Status", "", Some(Duration::from_secs(3))).await;
        let client = local_client(url, Duration::from_millis(200));

        let err = client.probe("TermuxUploads").await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{:?}", err);
        server.abort();
    }

    #[tokio::test]
    async fn refused_connection_maps_to_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = local_client(url, Duration::from_secs(5));
        let err = client.probe("TermuxUploads").await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)), "{:?}", err);
    }
}
