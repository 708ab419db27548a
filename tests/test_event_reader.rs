// tests/test_event_reader.rs
//
// Reading CSV / JSON-lines / zstd objects from a file:// prefix.

mod common;

use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

use common::ts;
use streamreplay::file_store::FileSystemObjectStore;
use streamreplay::source::{
    EventSource, FieldMapping, ObjectRecordReader, ReaderOptions, RecordStream, SourceError,
    TimedSource,
};
use streamreplay::SourceFormat;

const TAXI_HEADER: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,pickup_longitude,pickup_latitude,store_and_fwd_flag";

fn write(dir: &Path, name: &str, contents: &[u8]) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn prefix(dir: &Path) -> String {
    FileSystemObjectStore::path_to_uri(dir)
}

async fn read_all(reader: &mut ObjectRecordReader) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    while let Some(record) = reader.next_record().await? {
        out.push(serde_json::from_slice(&record.payload)?);
    }
    Ok(out)
}

#[tokio::test]
async fn taxi_csv_is_normalized() -> Result<()> {
    let dir = TempDir::new()?;
    let csv = format!(
        "{}\n1,2018-01-01 00:00:00,2018-01-01 00:10:00,2,1.5,-73.99,40.75,N\n2,2018-01-01 00:01:00,2018-01-01 00:12:30,,,-73.98,40.76,Y\n",
        TAXI_HEADER
    );
    write(dir.path(), "trips.csv", csv.as_bytes());

    let mut reader = ObjectRecordReader::open(&prefix(dir.path()), ReaderOptions::default()).await?;
    let first = reader.next_record().await?.unwrap();
    assert_eq!(first.timestamp, ts(600));

    let value: Value = serde_json::from_slice(&first.payload)?;
    assert_eq!(value["vendor_id"], "1");
    assert_eq!(value["dropoff_datetime"], "2018-01-01 00:10:00");
    assert_eq!(value["passenger_count"], 2);
    assert_eq!(value["trip_distance"], 2414);
    assert_eq!(value["pickup_latitude"], 40.75);

    let second = reader.next_record().await?.unwrap();
    assert_eq!(second.timestamp, ts(750));
    let value: Value = serde_json::from_slice(&second.payload)?;
    assert_eq!(value["passenger_count"], 0);
    assert_eq!(value["trip_distance"], 0);

    assert!(reader.next_record().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn payload_keys_are_sorted() -> Result<()> {
    let dir = TempDir::new()?;
    write(
        dir.path(),
        "a.jsonl",
        b"{\"zeta\":1,\"dropoff_datetime\":\"2018-01-01 00:00:05\",\"alpha\":2}\n",
    );

    let mut reader = ObjectRecordReader::open(&prefix(dir.path()), ReaderOptions::default()).await?;
    let record = reader.next_record().await?.unwrap();
    assert_eq!(
        std::str::from_utf8(&record.payload)?,
        "{\"alpha\":2,\"dropoff_datetime\":\"2018-01-01 00:00:05\",\"zeta\":1}"
    );
    Ok(())
}

#[tokio::test]
async fn objects_are_read_in_key_order() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir(dir.path().join("2018-02"))?;
    write(
        &dir.path().join("2018-02"),
        "part-0.jsonl",
        b"{\"dropoff_datetime\":\"2018-01-01 00:00:03\",\"n\":3}\n",
    );
    write(
        dir.path(),
        "2018-01.jsonl",
        b"# comment\n\n{\"dropoff_datetime\":\"2018-01-01 00:00:01\",\"n\":1}\n{\"dropoff_datetime\":\"2018-01-01 00:00:02\",\"n\":2}\n",
    );

    let mut reader = ObjectRecordReader::open(&prefix(dir.path()), ReaderOptions::default()).await?;
    assert_eq!(reader.remaining_objects(), 2);

    let values = read_all(&mut reader).await?;
    let ns: Vec<i64> = values.iter().map(|v| v["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, vec![1, 2, 3]);
    assert_eq!(reader.records_read(), 3);
    Ok(())
}

#[tokio::test]
async fn zstd_objects_are_decompressed() -> Result<()> {
    let dir = TempDir::new()?;
    let csv = format!(
        "{}\n1,2018-01-01 00:00:00,2018-01-01 00:00:30,1,0.0,0,0,N\n",
        TAXI_HEADER
    );
    write(dir.path(), "trips.csv.zst", &zstd::encode_all(csv.as_bytes(), 3)?);

    let mut reader = ObjectRecordReader::open(&prefix(dir.path()), ReaderOptions::default()).await?;
    let record = reader.next_record().await?.unwrap();
    assert_eq!(record.timestamp, ts(30));
    assert!(reader.next_record().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn malformed_records_are_skipped_by_default() -> Result<()> {
    let dir = TempDir::new()?;
    write(
        dir.path(),
        "mixed.jsonl",
        b"{\"dropoff_datetime\":\"2018-01-01 00:00:01\"}\nnot json\n{\"dropoff_datetime\":\"soon\"}\n{\"other\":1}\n{\"dropoff_datetime\":\"2018-01-01 00:00:02\"}\n",
    );

    let mut reader = ObjectRecordReader::open(&prefix(dir.path()), ReaderOptions::default()).await?;
    let values = read_all(&mut reader).await?;
    assert_eq!(values.len(), 2);
    assert_eq!(reader.skipped(), 3);
    Ok(())
}

#[tokio::test]
async fn strict_mode_surfaces_malformed_records() -> Result<()> {
    let dir = TempDir::new()?;
    write(
        dir.path(),
        "bad.jsonl",
        b"{\"dropoff_datetime\":\"2018-01-01 00:00:01\"}\n{\"passenger_count\":\"many\",\"dropoff_datetime\":\"2018-01-01 00:00:02\"}\n",
    );

    let options = ReaderOptions::default().skip_malformed(false);
    let mut reader = ObjectRecordReader::open(&prefix(dir.path()), options).await?;
    assert!(reader.next_record().await?.is_some());

    match reader.next_record().await {
        Err(SourceError::Malformed { location, reason }) => {
            assert!(location.ends_with("bad.jsonl:2"), "{}", location);
            assert!(reason.contains("passenger_count"), "{}", reason);
        }
        other => panic!("expected a malformed record error, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn pattern_and_format_options() -> Result<()> {
    let dir = TempDir::new()?;
    write(dir.path(), "keep.data", b"ts,value\n1514764801000,a\n");
    write(dir.path(), "skip.data", b"ts,value\n1514764802000,b\n");

    let options = ReaderOptions::default()
        .with_pattern(Regex::new(r"keep\.data$")?)
        .with_format(SourceFormat::Csv)
        .with_mapping(FieldMapping::identity())
        .with_timestamp_attribute("TS");
    let mut reader = ObjectRecordReader::open(&prefix(dir.path()), options).await?;

    let values = read_all(&mut reader).await?;
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["value"], "a");
    Ok(())
}

#[tokio::test]
async fn unsupported_scheme_is_rejected() {
    let result = ObjectRecordReader::open("s3://bucket/trips/", ReaderOptions::default()).await;
    assert!(matches!(result, Err(SourceError::Store(_))));
}

#[tokio::test]
async fn seek_skips_earlier_records() -> Result<()> {
    let dir = TempDir::new()?;
    let lines: String = (0..10)
        .map(|i| format!("{{\"dropoff_datetime\":\"2018-01-01 00:00:{:02}\",\"n\":{}}}\n", i * 5, i))
        .collect();
    write(dir.path(), "trips.jsonl", lines.as_bytes());

    let reader = ObjectRecordReader::open(&prefix(dir.path()), ReaderOptions::default()).await?;
    let mut source = TimedSource::new(reader);
    source.seek(ts(22)).await?;

    let first = source.next_event().await?.unwrap();
    assert_eq!(first.domain_timestamp(), ts(25));
    let mut count = 1;
    while source.next_event().await?.is_some() {
        count += 1;
    }
    assert_eq!(count, 5);
    Ok(())
}
