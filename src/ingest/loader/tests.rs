use super::*;
use std::io::Write;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("should write fixture");
    path
}

fn write_docx(dir: &TempDir, name: &str, document_xml: &str) -> PathBuf {
    let path = dir.path().join(name);
    let file = fs::File::create(&path).expect("should create docx");
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("word/document.xml", SimpleFileOptions::default())
        .expect("should start zip entry");
    writer
        .write_all(document_xml.as_bytes())
        .expect("should write zip entry");
    writer.finish().expect("should finish zip");
    path
}

#[test]
fn loads_plain_text() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "intro.txt", "Paris is the capital of France.");

    let docs = DocumentLoader::default()
        .load_path(&path)
        .expect("text file should load");

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].text, "Paris is the capital of France.");
    assert_eq!(docs[0].file_type, FileType::Text);
    assert!(docs[0].source.ends_with("intro.txt"));
}

#[test]
fn markdown_is_rendered_to_text() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(
        &dir,
        "guide.md",
        "# Setup\n\nRun the **installer** first.\n\n- one\n- two\n",
    );

    let doc = load_file(&path).expect("markdown should load");

    assert_eq!(doc.file_type, FileType::Markdown);
    assert!(doc.text.contains("Setup"));
    assert!(doc.text.contains("Run the installer first."));
    assert!(!doc.text.contains("**"));
    assert!(!doc.text.contains('#'));
}

#[test]
fn html_skips_scripts_and_styles() {
    let html = r#"
        <html>
          <head><title>Capitals</title><style>body { color: red; }</style></head>
          <body>
            <h1>Europe</h1>
            <p>Paris   is the capital
               of France.</p>
            <script>var hidden = "do not index";</script>
          </body>
        </html>
    "#;

    let text = html_to_text(html);

    assert!(text.starts_with("Capitals"));
    assert!(text.contains("Europe"));
    assert!(text.contains("Paris is the capital of France."));
    assert!(!text.contains("do not index"));
    assert!(!text.contains("color: red"));
}

#[test]
fn docx_paragraphs_are_extracted() {
    let dir = TempDir::new().expect("should create temp dir");
    let xml = r#"<?xml version="1.0"?>
        <w:document><w:body>
          <w:p><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report</w:t></w:r></w:p>
          <w:p><w:r><w:t>Revenue &amp; costs</w:t></w:r></w:p>
        </w:body></w:document>"#;
    let path = write_docx(&dir, "report.docx", xml);

    let doc = load_file(&path).expect("docx should load");

    assert_eq!(doc.file_type, FileType::Docx);
    assert_eq!(doc.text, "Quarterly report\nRevenue & costs");
}

#[test]
fn corrupt_docx_is_unreadable() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "broken.docx", "this is not a zip archive");

    let result = load_file(&path);

    assert!(matches!(result, Err(LoadError::Unreadable { .. })));
}

#[test]
fn unsupported_extension_is_rejected() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "image.png", "not really an image");

    assert!(matches!(load_file(&path), Err(LoadError::Unsupported(_))));
}

#[test]
fn whitespace_only_file_is_empty() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "blank.txt", "  \n\t ");

    assert!(matches!(load_file(&path), Err(LoadError::Empty(_))));
}

#[test]
fn missing_file_is_unreadable() {
    let result = load_file(Path::new("/definitely/not/here.txt"));
    assert!(matches!(result, Err(LoadError::Unreadable { .. })));
}

#[test]
fn directory_skips_bad_files() {
    let dir = TempDir::new().expect("should create temp dir");
    write_file(&dir, "a.txt", "alpha");
    write_file(&dir, "b.md", "beta");
    write_file(&dir, "c.docx", "corrupt");
    write_file(&dir, "d.bin", "unsupported");

    let docs = DocumentLoader::default()
        .load(dir.path().to_str().expect("utf-8 temp path"))
        .expect("directory should load");

    let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
    assert_eq!(texts, vec!["alpha", "beta"]);
}

#[test]
fn unknown_scheme_is_unsupported() {
    let result = DocumentLoader::default().load("ftp://example.com/file.txt");
    assert!(matches!(result, Err(LoadError::Unsupported(_))));
}

#[tokio::test]
async fn web_page_is_fetched_and_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body><p>Lyon is in France.</p></body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let url = format!("{}/about", server.uri());
    let docs = tokio::task::spawn_blocking(move || DocumentLoader::default().load(&url))
        .await
        .expect("blocking task should join")
        .expect("page should load");

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].file_type, FileType::Web);
    assert_eq!(docs[0].text, "Lyon is in France.");
}

#[tokio::test]
async fn failed_fetch_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let result = tokio::task::spawn_blocking(move || DocumentLoader::default().load(&url))
        .await
        .expect("blocking task should join");

    assert!(matches!(result, Err(LoadError::Fetch { .. })));
}
