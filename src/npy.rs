//! Minimal NPY / NPZ reader for precomputed speaker embeddings.
//!
//! The checkpoints ship each base speaker's source embeddings as a single
//! `ses.npz` archive (a ZIP of `.npy` members, one per embedding name).
//! Only the subset of the NumPy format those files use is supported:
//! versions 1.0/2.0, `float32`, C-contiguous layout, 1-D or 2-D shapes.

use std::{collections::HashMap, io::Read, path::Path};

use anyhow::{bail, Context, Result};
use zip::ZipArchive;

/// A decoded array: shape plus flat f32 data in row-major order.
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    /// Flatten to a plain vector, consuming the array.
    ///
    /// Embedding files are stored as `(dim,)`, `(1, dim)` or `(dim, 1)`;
    /// all of them flatten to the same `dim`-element vector.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Parse a raw `.npy` byte buffer.
pub fn parse_npy(bytes: &[u8]) -> Result<NpyArray> {
    if bytes.len() < 10 || &bytes[..NPY_MAGIC.len()] != NPY_MAGIC {
        bail!("Not a valid NPY file (bad magic)");
    }
    let version = (bytes[6], bytes[7]);

    // v1 stores the header length as u16, v2 as u32.
    let (header_len, body_offset) = match version {
        (1, _) => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        (2, _) => {
            if bytes.len() < 12 {
                bail!("NPY v2 file too short");
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        (major, minor) => bail!("Unsupported NPY version {}.{}", major, minor),
    };

    let data_start = body_offset + header_len;
    if bytes.len() < data_start {
        bail!("NPY file truncated in header");
    }
    let header = std::str::from_utf8(&bytes[body_offset..data_start])
        .context("NPY header is not valid UTF-8")?;

    let dtype = header_field(header, "descr").context("NPY header missing 'descr'")?;
    let dtype = dtype.trim().trim_matches(&['\'', '"'][..]);
    if !matches!(dtype, "<f4" | "=f4" | "|f4" | ">f4") {
        bail!("Unsupported dtype '{}' — embeddings must be float32", dtype);
    }
    let big_endian = dtype.starts_with('>');

    let fortran = header_field(header, "fortran_order").unwrap_or("False");
    if fortran.trim().eq_ignore_ascii_case("true") {
        bail!("Fortran-order arrays are not supported");
    }

    let shape = parse_shape(
        header_field(header, "shape")
            .context("NPY header missing 'shape'")?
            .trim(),
    )?;
    let count: usize = shape.iter().product();

    let body = &bytes[data_start..];
    if body.len() < count * 4 {
        bail!("NPY data section too short: want {} bytes, have {}", count * 4, body.len());
    }
    let data = body[..count * 4]
        .chunks_exact(4)
        .map(|c| {
            let raw = [c[0], c[1], c[2], c[3]];
            if big_endian { f32::from_be_bytes(raw) } else { f32::from_le_bytes(raw) }
        })
        .collect();

    Ok(NpyArray { shape, data })
}

/// Pull one field's raw value out of the Python-dict header string,
/// e.g. `header_field("{'descr': '<f4', …}", "descr") == Some("<f4")`.
fn header_field<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    let rest = match header.find(&format!("'{}':", name)) {
        Some(p) => &header[p + name.len() + 3..],
        None => {
            let p = header.find(&format!("\"{}\":", name))?;
            &header[p + name.len() + 3..]
        }
    };
    let rest = rest.trim_start();
    match rest.chars().next()? {
        '(' => rest.find(')').map(|end| &rest[..end + 1]),
        q @ ('\'' | '"') => rest[1..].find(q).map(|end| &rest[1..1 + end]),
        _ => {
            let end = rest.find([',', '}']).unwrap_or(rest.len());
            Some(rest[..end].trim())
        }
    }
}

/// Parse a Python shape tuple: `(256,)`, `(1, 256)`, `()`.
fn parse_shape(s: &str) -> Result<Vec<usize>> {
    s.trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse().with_context(|| format!("Bad shape dimension: '{}'", d)))
        .collect()
}

/// Load every array from an NPZ archive, keyed by member name with the
/// `.npy` extension stripped.
pub fn load_npz(path: &Path) -> Result<HashMap<String, NpyArray>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open NPZ file: {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Cannot open ZIP archive: {}", path.display()))?;

    let mut arrays = HashMap::new();
    for i in 0..archive.len() {
        let mut member = archive.by_index(i).context("Failed to read ZIP entry")?;
        let name = member.name().trim_end_matches(".npy").to_string();
        let mut buf = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut buf).context("Failed to read NPY entry")?;
        let array =
            parse_npy(&buf).with_context(|| format!("Failed to parse NPY entry '{}'", name))?;
        arrays.insert(name, array);
    }
    Ok(arrays)
}

/// Build a v1.0 NPY buffer the way numpy would write it.  Test helper,
/// also used by other modules' tests to assemble NPZ fixtures.
#[cfg(test)]
pub(crate) fn make_npy(shape: &[usize], values: &[f32]) -> Vec<u8> {
    let dims = shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ");
    let mut header =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}", dims);
    // Header block (magic + sizes + header text) is padded to 64 bytes
    // with spaces, terminated by \n.
    let padded = (10 + header.len() + 1 + 63) / 64 * 64 - 10;
    while header.len() + 1 < padded {
        header.push(' ');
    }
    header.push('\n');

    let mut buf = Vec::new();
    buf.extend_from_slice(NPY_MAGIC);
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buf.extend_from_slice(header.as_bytes());
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_1d() {
        let values = vec![0.25f32, -1.0, 3.5];
        let arr = parse_npy(&make_npy(&[3], &values)).unwrap();
        assert_eq!(arr.shape, vec![3]);
        assert_eq!(arr.data, values);
    }

    #[test]
    fn test_parse_2d_row_vector() {
        let values: Vec<f32> = (0..8).map(|x| x as f32).collect();
        let arr = parse_npy(&make_npy(&[1, 8], &values)).unwrap();
        assert_eq!(arr.shape, vec![1, 8]);
        assert_eq!(arr.into_vec(), values);
    }

    #[test]
    fn test_bad_magic() {
        assert!(parse_npy(b"NOTANPYFILE").is_err());
    }

    #[test]
    fn test_truncated_data() {
        let mut buf = make_npy(&[4], &[1.0, 2.0, 3.0, 4.0]);
        buf.truncate(buf.len() - 8);
        assert!(parse_npy(&buf).is_err());
    }

    #[test]
    fn test_npz_roundtrip() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ses.npz");

        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file("default.npy", options).unwrap();
        writer.write_all(&make_npy(&[4], &[1.0, 2.0, 3.0, 4.0])).unwrap();
        writer.start_file("style.npy", options).unwrap();
        writer.write_all(&make_npy(&[4], &[4.0, 3.0, 2.0, 1.0])).unwrap();
        writer.finish().unwrap();

        let arrays = load_npz(&path).unwrap();
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays["default"].data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(arrays["style"].data, vec![4.0, 3.0, 2.0, 1.0]);
    }
}
