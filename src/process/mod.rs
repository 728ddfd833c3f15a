// src/process/mod.rs
//! Chunked reading of the semicolon-delimited registry files. Everything is
//! kept as raw text: the RFB layouts vary by year and type inference would
//! silently corrupt values such as zero-prefixed codes.

pub mod concat;
pub mod write;

use std::io::{Read, Seek, SeekFrom};

use csv::{ByteRecord, ReaderBuilder};
use encoding_rs::{DecoderResult, Encoding, UTF_8, WINDOWS_1252};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// One bounded batch of parsed rows, all columns string-typed.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Encodings the registry has been published in, probed in order. UTF-8 goes
/// first: it is the strict one, while Windows-1252 accepts every byte and
/// would mojibake UTF-8 input if tried first.
static ENCODINGS: &[&'static Encoding] = &[UTF_8, WINDOWS_1252];

/// Scan the whole stream in bounded steps and return the first encoding under
/// which it decodes cleanly, rewinding the stream to the start afterwards.
pub fn detect_encoding<R: Read + Seek>(input: &mut R) -> Result<&'static Encoding> {
    for &encoding in ENCODINGS {
        input.seek(SeekFrom::Start(0))?;
        if validates(input, encoding)? {
            input.seek(SeekFrom::Start(0))?;
            debug!(encoding = encoding.name(), "input encoding");
            return Ok(encoding);
        }
    }
    Err(PipelineError::DecodingFailed)
}

fn validates<R: Read>(input: &mut R, encoding: &'static Encoding) -> Result<bool> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut buf = [0u8; 64 * 1024];
    let mut out = [0u8; 256 * 1024];
    loop {
        let n = input.read(&mut buf)?;
        let last = n == 0;
        let mut src = &buf[..n];
        loop {
            let (result, read, _written) =
                decoder.decode_to_utf8_without_replacement(src, &mut out, last);
            match result {
                DecoderResult::Malformed(_, _) => return Ok(false),
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => src = &src[read..],
            }
        }
        if last {
            return Ok(true);
        }
    }
}

fn decode_record(record: &ByteRecord, encoding: &'static Encoding) -> Vec<String> {
    record
        .iter()
        .map(|field| encoding.decode_without_bom_handling(field).0.into_owned())
        .collect()
}

/// Lazy, forward-only reader yielding [`RowBatch`]es of at most `chunk_size`
/// rows. Not restartable; construct a fresh reader to re-read.
pub struct ChunkReader<R: Read> {
    reader: csv::Reader<R>,
    columns: Vec<String>,
    encoding: &'static Encoding,
    chunk_size: usize,
    done: bool,
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Probe the encoding, then position a semicolon CSV parser after the
    /// header row.
    pub fn new(mut input: R, chunk_size: usize) -> Result<Self> {
        let encoding = detect_encoding(&mut input)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .from_reader(input);
        let columns = decode_record(&reader.byte_headers()?.clone(), encoding);
        Ok(Self {
            reader,
            columns,
            encoding,
            chunk_size: chunk_size.max(1),
            done: false,
        })
    }
}

impl<R: Read> ChunkReader<R> {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut rows = Vec::with_capacity(self.chunk_size.min(64 * 1024));
        let mut record = ByteRecord::new();
        while rows.len() < self.chunk_size {
            match self.reader.read_byte_record(&mut record) {
                Ok(true) => rows.push(decode_record(&record, self.encoding)),
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        if rows.is_empty() {
            return None;
        }
        Some(Ok(RowBatch {
            columns: self.columns.clone(),
            rows,
        }))
    }
}
