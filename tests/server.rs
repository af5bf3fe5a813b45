use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docsearch::config::Config;
use docsearch::embedding::Embedder;
use docsearch::server::run_server_with_embedder;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tempfile::TempDir;

/// Bag-of-words embedder: each lowercase word lands in one of `dims`
/// buckets. Deterministic and offline.
struct WordHashEmbedder;

#[async_trait]
impl Embedder for WordHashEmbedder {
    fn model_name(&self) -> &str {
        "word-hash"
    }
    fn dims(&self) -> usize {
        64
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 64];
                for word in t.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                    let h = word
                        .to_lowercase()
                        .bytes()
                        .fold(5381u64, |h, b| h.wrapping_mul(33) ^ b as u64);
                    v[(h % 64) as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    _tmp: TempDir,
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

async fn start_server_with(configure: impl FnOnce(&mut Config)) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.db.path = tmp.path().join("server.sqlite");
    config.server.bind = format!("127.0.0.1:{}", free_port());
    configure(&mut config);
    let base = format!("http://{}", config.server.bind);

    tokio::spawn(async move {
        if let Err(e) = run_server_with_embedder(&config, Arc::new(WordHashEmbedder)).await {
            panic!("server failed: {:#}", e);
        }
    });

    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/health", base)).send().await {
            if resp.status().is_success() {
                return TestServer {
                    base,
                    client,
                    _tmp: tmp,
                };
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server did not start at {}", base);
}

fn text_part(filename: &str, body: &[u8]) -> Part {
    Part::bytes(body.to_vec())
        .file_name(filename.to_string())
        .mime_str("text/plain")
        .unwrap()
}

async fn upload(server: &TestServer, files: &[(&str, &[u8])]) -> reqwest::Response {
    let mut form = Form::new();
    for (name, body) in files {
        form = form.part("files", text_part(name, body));
    }
    server
        .client
        .post(format!("{}/ingest/", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn get_json(server: &TestServer, path: &str) -> (u16, Value) {
    let resp = server
        .client
        .get(format!("{}{}", server.base, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_health_reports_model_and_count() {
    let server = start_server().await;
    let (status, body) = get_json(&server, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["documents"], 0);
    assert_eq!(body["model"], "word-hash");
}

#[tokio::test]
async fn test_ingest_then_query_and_list() {
    let server = start_server().await;

    let resp = upload(
        &server,
        &[
            ("fruit.txt", "apple banana cherry".as_bytes()),
            ("code.txt", "rust compiler borrow checker".as_bytes()),
            ("sea.txt", "ocean waves tide".as_bytes()),
        ],
    )
    .await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "Documents uploaded successfully");
    assert_eq!(body["documents"].as_array().unwrap().len(), 3);
    assert_eq!(body["documents"][1]["filename"], "code.txt");

    let (status, body) = get_json(&server, "/query/?query_text=rust%20borrow").await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["filename"], "code.txt");
    assert_eq!(results[0]["text"], "rust compiler borrow checker");
    assert!(results[0]["score"].as_f64().unwrap() < results[1]["score"].as_f64().unwrap());

    let (status, body) = get_json(&server, "/query?query_text=ocean&n_results=1").await;
    assert_eq!(status, 200);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filename"], "sea.txt");
    let sea_id = results[0]["id"].as_str().unwrap().to_string();

    let (status, body) = get_json(&server, "/database/").await;
    assert_eq!(status, 200);
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0]["filename"], "fruit.txt");
    assert_eq!(docs[0]["text"], "apple banana cherry");

    let (status, body) = get_json(&server, &format!("/database/{}", sea_id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["filename"], "sea.txt");

    let (_, body) = get_json(&server, "/health").await;
    assert_eq!(body["documents"], 3);
}

#[tokio::test]
async fn test_undecodable_upload_is_rejected_and_nothing_stored() {
    let server = start_server().await;

    let resp = upload(
        &server,
        &[("good.txt", "fine".as_bytes()), ("bad.bin", &[0xff, 0xfe, 0xfd][..])],
    )
    .await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "Cannot decode 'bad.bin'.");

    let (_, body) = get_json(&server, "/database").await;
    assert!(body["documents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_without_files_is_bad_request() {
    let server = start_server().await;

    let form = Form::new().text("comment", "no files here");
    let resp = server
        .client
        .post(format!("{}/ingest", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_invalid_queries_are_bad_requests() {
    let server = start_server().await;

    for path in [
        "/query/",
        "/query/?query_text=",
        "/query/?query_text=x&n_results=0",
        "/query/?query_text=x&n_results=1000",
        "/query/?query_text=x&n_results=abc",
    ] {
        let (status, body) = get_json(&server, path).await;
        assert_eq!(status, 400, "{}", path);
        assert_eq!(body["error"]["code"], "bad_request", "{}", path);
    }
}

#[tokio::test]
async fn test_query_on_empty_store_returns_no_results() {
    let server = start_server().await;
    let (status, body) = get_json(&server, "/query/?query_text=anything").await;
    assert_eq!(status, 200);
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_document_is_not_found() {
    let server = start_server().await;
    let (status, body) = get_json(&server, "/database/does-not-exist").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

fn docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[tokio::test]
async fn test_docx_upload_is_extracted() {
    let server = start_server().await;

    let part = Part::bytes(docx_with_text("office test phrase"))
        .file_name("report.docx")
        .mime_str("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        .unwrap();
    let resp = server
        .client
        .post(format!("{}/ingest/", server.base))
        .multipart(Form::new().part("files", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let (_, body) = get_json(&server, "/database/").await;
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["filename"], "report.docx");
    assert_eq!(docs[0]["text"], "office test phrase");
    assert_eq!(
        docs[0]["content_type"],
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
}

#[tokio::test]
async fn test_oversized_upload_is_payload_too_large() {
    let server = start_server_with(|config| config.server.max_upload_bytes = 1024).await;

    let big = "word ".repeat(8 * 1024 / 5);
    let resp = upload(&server, &[("big.txt", big.as_bytes())]).await;
    assert_eq!(resp.status().as_u16(), 413);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "payload_too_large");

    let (_, body) = get_json(&server, "/database/").await;
    assert!(body["documents"].as_array().unwrap().is_empty());

    let resp = upload(&server, &[("small.txt", "fits easily".as_bytes())]).await;
    assert_eq!(resp.status().as_u16(), 200);
}
