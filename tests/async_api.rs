#![cfg(feature = "async")]

mod common;

use common::EpubBuilder;
use ink_epub::{open_epub_async, open_epub_async_with_options, EpubError, EpubOptions};

#[tokio::test]
async fn test_open_epub_async_loads_items() {
    let dir = tempfile::tempdir().unwrap();
    let path = EpubBuilder::sample().write_to(dir.path());

    let mut epub = open_epub_async(&path).await.unwrap();
    assert_eq!(epub.metadata("dc:title"), Some("The Sample Book"));
    assert_eq!(epub.load(1).unwrap().path(), "OEBPS/text/ch2.xhtml");
}

#[tokio::test]
async fn test_open_epub_async_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = open_epub_async(dir.path().join("absent.epub")).await;
    assert!(matches!(result, Err(EpubError::Io(_))));
}

#[tokio::test]
async fn test_open_epub_async_with_options_enforces_mimetype() {
    let dir = tempfile::tempdir().unwrap();
    let path = EpubBuilder::sample()
        .without("mimetype")
        .write_to(dir.path());
    let options = EpubOptions::new().with_required_mimetype(true);
    assert!(matches!(
        open_epub_async_with_options(&path, options).await,
        Err(EpubError::FatalFormat(_))
    ));
}
