use byteorder::ReadBytesExt;
use haloblur_core::sample::{Sample, SampleDepth};
use haloblur_core::Extent;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::CodecError;

const MAGIC: &str = "P5";
const GENERATOR: &str = concat!("generated by haloblur ", env!("CARGO_PKG_VERSION"));

/// Header fields of a binary PGM file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PgmHeader {
    pub width: usize,
    pub height: usize,
    pub max_value: u32,
}

impl PgmHeader {
    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    pub fn depth(&self) -> SampleDepth {
        SampleDepth::for_max_value(self.max_value)
    }

    /// Size of the raster in bytes.
    pub fn raster_len(&self) -> usize {
        self.extent().volume() * self.depth().size_in_bytes()
    }
}

fn next_byte<R: Read>(reader: &mut R) -> Result<Option<u8>, CodecError> {
    match reader.read_u8() {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads the next whitespace-delimited header token, skipping comments. Exactly one byte of
/// whitespace after the token is consumed. Returns `None` at end of input.
fn next_token<R: Read>(reader: &mut R) -> Result<Option<String>, CodecError> {
    let mut token = String::new();

    loop {
        let b = match next_byte(reader)? {
            Some(b) => b,
            None => break,
        };

        if b.is_ascii_whitespace() {
            if token.is_empty() {
                continue;
            }
            break;
        }

        if b == b'#' && token.is_empty() {
            while let Some(b) = next_byte(reader)? {
                if b == b'\n' {
                    break;
                }
            }
            continue;
        }

        token.push(b as char);
    }

    Ok(if token.is_empty() { None } else { Some(token) })
}

fn parse_field<R: Read>(reader: &mut R, field: &'static str) -> Result<u64, CodecError> {
    let token = next_token(reader)?.ok_or(CodecError::MissingField(field))?;
    token
        .parse()
        .map_err(|_| CodecError::InvalidField { field, value: token })
}

/// Parses the header and leaves `reader` positioned at the first raster byte.
pub fn read_header<R: Read>(reader: &mut R) -> Result<PgmHeader, CodecError> {
    let magic = next_token(reader)?.ok_or(CodecError::MissingField("magic"))?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }

    let width = parse_field(reader, "width")? as usize;
    let height = parse_field(reader, "height")? as usize;
    let max_value = parse_field(reader, "max value")?;

    if width == 0 || height == 0 {
        return Err(CodecError::ZeroDimension { width, height });
    }

    if !(1..=u16::MAX as u64).contains(&max_value) {
        return Err(CodecError::MaxValueOutOfRange(max_value));
    }

    Ok(PgmHeader {
        width,
        height,
        max_value: max_value as u32,
    })
}

/// Opens `path` and parses its header. The returned reader is positioned at the raster.
pub fn open(path: impl AsRef<Path>) -> Result<(PgmHeader, BufReader<File>), CodecError> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = read_header(&mut reader)?;
    Ok((header, reader))
}

/// Decodes raster bytes into samples. The byte count must be a multiple of the sample size.
pub fn decode_samples<S: Sample>(bytes: &[u8]) -> Result<Vec<S>, CodecError> {
    let size = S::DEPTH.size_in_bytes();
    if bytes.len() % size != 0 {
        return Err(CodecError::SampleCountMismatch {
            expected: bytes.len() / size + 1,
            found: bytes.len() / size,
        });
    }

    let mut samples = vec![S::default(); bytes.len() / size];
    S::decode_into(bytes, &mut samples);
    Ok(samples)
}

pub fn encode_samples<S: Sample>(samples: &[S]) -> Vec<u8> {
    let mut bytes = vec![0; samples.len() * S::DEPTH.size_in_bytes()];
    S::encode_into(samples, &mut bytes);
    bytes
}

pub fn write_header<W: Write>(writer: &mut W, header: &PgmHeader) -> Result<(), CodecError> {
    write!(
        writer,
        "{}\n# {}\n{} {}\n{}\n",
        MAGIC, GENERATOR, header.width, header.height, header.max_value
    )?;
    Ok(())
}

/// Writes a complete PGM file. `samples` must match the header in count and depth.
pub fn write_image<S: Sample>(
    path: impl AsRef<Path>,
    header: &PgmHeader,
    samples: &[S],
) -> Result<(), CodecError> {
    if S::DEPTH != header.depth() {
        return Err(CodecError::DepthMismatch {
            header: header.depth(),
            samples: S::DEPTH,
        });
    }

    let expected = header.extent().volume();
    if samples.len() != expected {
        return Err(CodecError::SampleCountMismatch {
            expected,
            found: samples.len(),
        });
    }

    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, header)?;
    writer.write_all(&encode_samples(samples))?;
    writer.flush()?;
    Ok(())
}

/// Reads a complete PGM file whose depth matches `S`.
pub fn read_image<S: Sample>(path: impl AsRef<Path>) -> Result<(PgmHeader, Vec<S>), CodecError> {
    let (header, mut reader) = open(path)?;
    if S::DEPTH != header.depth() {
        return Err(CodecError::DepthMismatch {
            header: header.depth(),
            samples: S::DEPTH,
        });
    }

    let mut bytes = vec![0; header.raster_len()];
    reader.read_exact(&mut bytes)?;
    Ok((header, decode_samples(&bytes)?))
}
