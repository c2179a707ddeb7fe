//! Purpose: Exercise local dump extraction through the public API.
//! Role: Validate gzip and plain dumps, offsets, and file-level errors end to end.
//! Invariants: Fixtures are generated into temp dirs; the checked-in dump is never modified.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use extlinks::api::{
    CancelToken, Compression, ErrorKind, ExtractOptions, Extractor, Link, Schema,
};
use flate2::write::GzEncoder;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/externallinks.sql")
}

fn gzip_to(path: &Path, data: &[u8]) -> TestResult<()> {
    let mut encoder = GzEncoder::new(File::create(path)?, flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(())
}

fn gzipped_fixture(dir: &Path) -> TestResult<PathBuf> {
    let path = dir.join("testwiki-externallinks.sql.gz");
    gzip_to(&path, &std::fs::read(fixture())?)?;
    Ok(path)
}

fn collect(extractor: &Extractor, path: &Path, offset: i64) -> TestResult<Vec<Link>> {
    let links = extractor
        .extract_path(path, ExtractOptions::new().with_offset(offset))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

fn urls(links: &[Link]) -> Vec<&str> {
    links.iter().map(|link| link.url.as_str()).collect()
}

#[test]
fn gzip_dump_yields_all_values_in_order() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let path = gzipped_fixture(temp.path())?;
    let links = collect(&Extractor::default(), &path, 0)?;
    assert_eq!(
        urls(&links),
        vec![
            "http://1a.example.com/bleedin'",
            "http://2a.example.com",
            "//3a.example.com",
        ]
    );
    assert_eq!(
        links.iter().map(|link| link.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    Ok(())
}

#[test]
fn offsets_resume_from_the_requested_index() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let path = gzipped_fixture(temp.path())?;
    let extractor = Extractor::new(Schema::V129);

    let from_two = collect(&extractor, &path, 2)?;
    assert_eq!(urls(&from_two), vec!["//3a.example.com"]);
    assert_eq!(from_two[0].index, 2);

    assert_eq!(collect(&extractor, &path, -1)?.len(), 3);
    assert!(collect(&extractor, &path, 3)?.is_empty());
    Ok(())
}

#[test]
fn plain_dump_with_matching_compression() -> TestResult<()> {
    let plain = Extractor::default().with_compression(Compression::None);
    let auto = Extractor::default().with_compression(Compression::Auto);
    assert_eq!(collect(&plain, &fixture(), 1)?, collect(&auto, &fixture(), 1)?);
    assert_eq!(collect(&plain, &fixture(), 0)?.len(), 3);
    Ok(())
}

#[test]
fn plain_dump_read_as_gzip_is_io_error() -> TestResult<()> {
    let result = Extractor::default()
        .extract_path(fixture(), ExtractOptions::new())?
        .collect::<Result<Vec<_>, _>>();
    let err = result.expect_err("not gzip");
    assert_eq!(err.kind(), ErrorKind::Io);
    Ok(())
}

#[test]
fn empty_gzip_member_is_an_empty_dump() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let path = temp.path().join("empty.sql.gz");
    gzip_to(&path, b"")?;
    assert!(collect(&Extractor::default(), &path, 0)?.is_empty());
    Ok(())
}

#[test]
fn concatenated_gzip_members_read_as_one_dump() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let first = temp.path().join("first.gz");
    let second = temp.path().join("second.gz");
    gzip_to(
        &first,
        b"INSERT INTO `externallinks` VALUES (1,1,'http://a.example','x','y');\n",
    )?;
    gzip_to(
        &second,
        b"INSERT INTO `externallinks` VALUES (2,1,'http://b.example','x','y');\n",
    )?;
    let mut joined = std::fs::read(&first)?;
    joined.extend(std::fs::read(&second)?);
    let path = temp.path().join("joined.sql.gz");
    std::fs::write(&path, joined)?;

    let links = collect(&Extractor::default(), &path, 1)?;
    assert_eq!(urls(&links), vec!["http://b.example"]);
    assert_eq!(links[0].index, 1);
    Ok(())
}

#[test]
fn missing_dump_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = Extractor::default()
        .extract_path(temp.path().join("nope.sql.gz"), ExtractOptions::new())
        .expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        err.path().map(|p| p.ends_with("nope.sql.gz")),
        Some(true)
    );
}

#[test]
fn cancel_mid_dump_reports_resume_index() -> TestResult<()> {
    let cancel = CancelToken::new();
    let mut extraction = Extractor::default()
        .with_compression(Compression::None)
        .extract_path(fixture(), ExtractOptions::new().with_cancel(cancel.clone()))?;
    let first = extraction.next().expect("value")?;
    let second = extraction.next().expect("value")?;
    assert_eq!((first.index, second.index), (0, 1));
    cancel.cancel();
    let err = extraction.next().expect("error").expect_err("cancelled");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.index(), Some(2));
    assert!(extraction.next().is_none());
    Ok(())
}
