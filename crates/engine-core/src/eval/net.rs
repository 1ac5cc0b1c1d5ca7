//! Optional evaluation network. The on-disk format is a length-prefixed,
//! deflate-compressed blob holding a quantized input transform and three
//! small integer linear layers. Training the weights is out of scope; this
//! module only loads and runs them.

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::info;

use crate::bitboard;
use crate::position::Position;
use crate::types::{Piece, Square};

pub const INPUT_FEATURES: usize = 12 * 64;
pub const HIDDEN1: usize = 128;
pub const HIDDEN2: usize = 32;
pub const HIDDEN3: usize = 32;

const MAGIC: u32 = 0x4b45_4e31; // "KEN1"

/// Quantization: the input transform accumulates in i16, later layers in i32
/// with an output scale of 1/64 per layer and centipawns out the end.
pub struct Network {
    input_weights: Vec<i16>, // [INPUT_FEATURES][HIDDEN1]
    input_bias: Vec<i16>,    // [HIDDEN1]
    l1_weights: Vec<i8>,     // [HIDDEN1][HIDDEN2]
    l1_bias: Vec<i32>,
    l2_weights: Vec<i8>, // [HIDDEN2][HIDDEN3]
    l2_bias: Vec<i32>,
    out_weights: Vec<i8>, // [HIDDEN3]
    out_bias: i32,
}

/// Network blob decode failure.
#[derive(Debug)]
pub enum NetError {
    Io(std::io::Error),
    Format(String),
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetError::Io(e) => write!(f, "network read error: {e}"),
            NetError::Format(s) => write!(f, "bad network data: {s}"),
        }
    }
}

impl std::error::Error for NetError {}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> NetError {
        NetError::Io(e)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], NetError> {
        if self.pos + n > self.data.len() {
            return Err(NetError::Format("unexpected end of data".into()));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u32(&mut self) -> Result<u32, NetError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, NetError> {
        Ok(self.u32()? as i32)
    }

    fn i16_vec(&mut self, n: usize) -> Result<Vec<i16>, NetError> {
        let b = self.take(n * 2)?;
        Ok(b.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
    }

    fn i8_vec(&mut self, n: usize) -> Result<Vec<i8>, NetError> {
        let b = self.take(n)?;
        Ok(b.iter().map(|&v| v as i8).collect())
    }

    fn i32_vec(&mut self, n: usize) -> Result<Vec<i32>, NetError> {
        let b = self.take(n * 4)?;
        Ok(b.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
    }
}

impl Network {
    /// Load from the on-disk representation: a little-endian u32 length of
    /// the decompressed payload, followed by the deflate stream.
    pub fn load(mut reader: impl Read) -> Result<Network, NetError> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let expected = u32::from_le_bytes(len_buf) as usize;

        let mut raw = Vec::with_capacity(expected);
        ZlibDecoder::new(reader).read_to_end(&mut raw)?;
        if raw.len() != expected {
            return Err(NetError::Format(format!(
                "decompressed {} bytes, header promised {expected}",
                raw.len()
            )));
        }
        Self::from_bytes(&raw)
    }

    pub fn load_file(path: &std::path::Path) -> Result<Network, NetError> {
        let f = std::fs::File::open(path)?;
        let net = Self::load(std::io::BufReader::new(f))?;
        info!("loaded evaluation network from {}", path.display());
        Ok(net)
    }

    fn from_bytes(raw: &[u8]) -> Result<Network, NetError> {
        let mut c = Cursor { data: raw, pos: 0 };
        let magic = c.u32()?;
        if magic != MAGIC {
            return Err(NetError::Format(format!("bad magic {magic:#x}")));
        }
        let net = Network {
            input_weights: c.i16_vec(INPUT_FEATURES * HIDDEN1)?,
            input_bias: c.i16_vec(HIDDEN1)?,
            l1_weights: c.i8_vec(HIDDEN1 * HIDDEN2)?,
            l1_bias: c.i32_vec(HIDDEN2)?,
            l2_weights: c.i8_vec(HIDDEN2 * HIDDEN3)?,
            l2_bias: c.i32_vec(HIDDEN3)?,
            out_weights: c.i8_vec(HIDDEN3)?,
            out_bias: c.i32()?,
        };
        if c.pos != raw.len() {
            return Err(NetError::Format(format!("{} trailing bytes", raw.len() - c.pos)));
        }
        Ok(net)
    }

    /// Total decompressed payload size in bytes; kept in sync with
    /// `from_bytes` by the layout tests.
    pub const fn payload_size() -> usize {
        4 + INPUT_FEATURES * HIDDEN1 * 2
            + HIDDEN1 * 2
            + HIDDEN1 * HIDDEN2
            + HIDDEN2 * 4
            + HIDDEN2 * HIDDEN3
            + HIDDEN3 * 4
            + HIDDEN3
            + 4
    }

    fn feature(p: Piece, sq: Square) -> usize {
        (p.index() - 1) * 64 + sq.index()
    }

    /// Evaluate from White's point of view, centipawns.
    pub fn eval_white(&self, pos: &Position) -> i32 {
        let mut acc = [0i32; HIDDEN1];
        for (i, b) in self.input_bias.iter().enumerate() {
            acc[i] = *b as i32;
        }
        for sq in bitboard::squares(pos.occupied()) {
            let f = Self::feature(pos.piece_on(sq), sq);
            let row = &self.input_weights[f * HIDDEN1..(f + 1) * HIDDEN1];
            for (a, w) in acc.iter_mut().zip(row) {
                *a += *w as i32;
            }
        }

        let mut h1 = [0i32; HIDDEN2];
        for (j, out) in h1.iter_mut().enumerate() {
            let mut sum = self.l1_bias[j];
            for (i, a) in acc.iter().enumerate() {
                let x = (*a).clamp(0, 127);
                sum += x * self.l1_weights[i * HIDDEN2 + j] as i32;
            }
            *out = sum / 64;
        }

        let mut h2 = [0i32; HIDDEN3];
        for (j, out) in h2.iter_mut().enumerate() {
            let mut sum = self.l2_bias[j];
            for (i, v) in h1.iter().enumerate() {
                let x = (*v).clamp(0, 127);
                sum += x * self.l2_weights[i * HIDDEN3 + j] as i32;
            }
            *out = sum / 64;
        }

        let mut out = self.out_bias;
        for (v, w) in h2.iter().zip(&self.out_weights) {
            out += (*v).clamp(0, 127) * *w as i32;
        }
        out / 64
    }

    /// Evaluate from the side to move's point of view.
    pub fn eval(&self, pos: &Position) -> i32 {
        let w = self.eval_white(pos);
        if pos.is_white_move() {
            w
        } else {
            -w
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn synthetic_blob() -> Vec<u8> {
        let mut raw = Vec::with_capacity(Network::payload_size());
        raw.extend_from_slice(&MAGIC.to_le_bytes());
        // Input weights: bias every feature toward its piece index.
        for f in 0..INPUT_FEATURES {
            for h in 0..HIDDEN1 {
                let w = if h == f % HIDDEN1 { 3i16 } else { 0 };
                raw.extend_from_slice(&w.to_le_bytes());
            }
        }
        for _ in 0..HIDDEN1 {
            raw.extend_from_slice(&1i16.to_le_bytes());
        }
        for _ in 0..HIDDEN1 * HIDDEN2 {
            raw.push(1i8 as u8);
        }
        for _ in 0..HIDDEN2 {
            raw.extend_from_slice(&0i32.to_le_bytes());
        }
        for _ in 0..HIDDEN2 * HIDDEN3 {
            raw.push(1i8 as u8);
        }
        for _ in 0..HIDDEN3 {
            raw.extend_from_slice(&0i32.to_le_bytes());
        }
        for _ in 0..HIDDEN3 {
            raw.push(1i8 as u8);
        }
        raw.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(raw.len(), Network::payload_size());

        let mut blob = Vec::new();
        blob.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        let mut enc = ZlibEncoder::new(&mut blob, Compression::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap();
        blob
    }

    #[test]
    fn load_and_eval_deterministic() {
        let blob = synthetic_blob();
        let net = Network::load(&blob[..]).unwrap();
        let pos = Position::start();
        let a = net.eval_white(&pos);
        let b = net.eval_white(&pos);
        assert_eq!(a, b);
        assert_eq!(net.eval(&pos), a);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut blob = synthetic_blob();
        // Corrupt the first compressed byte stream by rebuilding with wrong magic.
        let mut raw = vec![0u8; Network::payload_size()];
        raw[0] = 0xff;
        let mut bad = Vec::new();
        bad.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        let mut enc = ZlibEncoder::new(&mut bad, Compression::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap();
        assert!(Network::load(&bad[..]).is_err());
        blob.truncate(6);
        assert!(Network::load(&blob[..]).is_err());
    }

    #[test]
    fn rejects_length_mismatch() {
        let blob = synthetic_blob();
        let mut bad = blob.clone();
        let wrong = (Network::payload_size() as u32 + 1).to_le_bytes();
        bad[..4].copy_from_slice(&wrong);
        assert!(matches!(Network::load(&bad[..]), Err(NetError::Format(_))));
    }
}
