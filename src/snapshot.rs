use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};

use crate::models::Dataset;

fn write_snapshot<W: Write>(dataset: &Dataset, sink: W) -> std::io::Result<()> {
    let encoder = GzEncoder::new(sink, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, dataset)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    writer
        .into_inner()
        .map_err(|e| e.into_error())?
        .finish()?;
    Ok(())
}

fn read_snapshot<R: Read>(source: R) -> std::io::Result<Dataset> {
    let decoder = GzDecoder::new(source);
    let mut reader = BufReader::new(decoder);

    deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Back up the whole event database to a `.bin.gz` file.
pub fn save_snapshot(dataset: &Dataset, filename: &str) -> std::io::Result<()> {
    let file = File::create(filename)?;
    write_snapshot(dataset, file)
}

pub fn load_snapshot(filename: &str) -> std::io::Result<Dataset> {
    let file = File::open(filename)?;
    read_snapshot(file)
}

pub fn snapshot_to_bytes(dataset: &Dataset) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_snapshot(dataset, &mut buffer)?;
    Ok(buffer)
}

pub fn snapshot_from_bytes(buffer: &[u8]) -> std::io::Result<Dataset> {
    read_snapshot(Cursor::new(buffer))
}
