//! Pixel formats of canvas payloads.
//!
//! Every format decodes to a [`Bitmap`] holding 32 bit BGRA pixels in row-major order, and every
//! format can be encoded back from one. The block compressed formats are lossy; the others are
//! exact for any bitmap that came out of their decoder.
//!
//! | Code | Format            | Raw length                       |
//! |------|-------------------|----------------------------------|
//! | 1    | BGRA4444          | `w * h * 2`                      |
//! | 2    | BGRA8888          | `w * h * 4`                      |
//! | 3    | DXT3 (legacy)     | `ceil(w / 4) * ceil(h / 4) * 16` |
//! | 257  | ARGB1555          | `w * h * 2`                      |
//! | 513  | RGB565            | `w * h * 2`                      |
//! | 517  | RGB565, 16x16     | `ceil(w / 16) * ceil(h / 16) * 2`|
//! | 1026 | DXT3              | `ceil(w / 4) * ceil(h / 4) * 16` |
//! | 2050 | DXT5              | `ceil(w / 4) * ceil(h / 4) * 16` |

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};

/// Identifies how the raw pixels of a canvas are laid out
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgra4444,
    Bgra8888,

    /// DXT3 blocks stored under the old code
    Dxt3Legacy,
    Argb1555,
    Rgb565,

    /// One RGB565 sample per 16x16 tile
    Rgb565Tiled,
    Dxt3,
    Dxt5,

    /// A code no decoder exists for
    Other(i32),
}

impl From<i32> for PixelFormat {
    fn from(code: i32) -> Self {
        match code {
            1 => PixelFormat::Bgra4444,
            2 => PixelFormat::Bgra8888,
            3 => PixelFormat::Dxt3Legacy,
            257 => PixelFormat::Argb1555,
            513 => PixelFormat::Rgb565,
            517 => PixelFormat::Rgb565Tiled,
            1026 => PixelFormat::Dxt3,
            2050 => PixelFormat::Dxt5,
            other => PixelFormat::Other(other),
        }
    }
}

impl From<PixelFormat> for i32 {
    fn from(format: PixelFormat) -> Self {
        format.code()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Bgra4444 => "BGRA4444",
            PixelFormat::Bgra8888 => "BGRA8888",
            PixelFormat::Dxt3Legacy | PixelFormat::Dxt3 => "DXT3",
            PixelFormat::Argb1555 => "ARGB1555",
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::Rgb565Tiled => "RGB565/16",
            PixelFormat::Dxt5 => "DXT5",
            PixelFormat::Other(code) => return write!(f, "unknown({code})"),
        };
        write!(f, "{name}")
    }
}

impl PixelFormat {
    /// Code stored in the archive
    pub fn code(&self) -> i32 {
        match self {
            PixelFormat::Bgra4444 => 1,
            PixelFormat::Bgra8888 => 2,
            PixelFormat::Dxt3Legacy => 3,
            PixelFormat::Argb1555 => 257,
            PixelFormat::Rgb565 => 513,
            PixelFormat::Rgb565Tiled => 517,
            PixelFormat::Dxt3 => 1026,
            PixelFormat::Dxt5 => 2050,
            PixelFormat::Other(code) => *code,
        }
    }

    /// Whether encoding can lose information
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            PixelFormat::Dxt3Legacy | PixelFormat::Dxt3 | PixelFormat::Dxt5
        )
    }

    /// Length of the decompressed payload for a canvas of this size
    pub fn raw_len(&self, width: u32, height: u32) -> Result<usize> {
        let (w, h) = (width as usize, height as usize);
        Ok(match self {
            PixelFormat::Bgra4444 | PixelFormat::Argb1555 | PixelFormat::Rgb565 => w * h * 2,
            PixelFormat::Bgra8888 => w * h * 4,
            PixelFormat::Rgb565Tiled => w.div_ceil(16) * h.div_ceil(16) * 2,
            PixelFormat::Dxt3Legacy | PixelFormat::Dxt3 | PixelFormat::Dxt5 => {
                w.div_ceil(4) * h.div_ceil(4) * 16
            }
            PixelFormat::Other(code) => return Err(Error::UnsupportedPixelFormat(*code)),
        })
    }
}

/// Decoded pixels, four bytes per pixel in B, G, R, A order
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({}x{})", self.width, self.height)
    }
}

impl Bitmap {
    /// A fully transparent bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Wrap BGRA pixel data
    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(Error::InvalidOperation(format!(
                "{} bytes of pixel data for a {width}x{height} bitmap",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Magenta and black checkerboard shown in place of a canvas that cannot be decoded
    pub fn placeholder(width: u32, height: u32) -> Self {
        let mut bitmap = Self::new(width.max(1), height.max(1));
        for y in 0..bitmap.height {
            for x in 0..bitmap.width {
                let pixel = if (x / 8 + y / 8) % 2 == 0 {
                    [0xFF, 0x00, 0xFF, 0xFF]
                } else {
                    [0x00, 0x00, 0x00, 0xFF]
                };
                bitmap.set_pixel(x, y, pixel);
            }
        }
        bitmap
    }

    /// The BGRA value at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&pixel);
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

/// Decode a decompressed payload
///
/// A payload shorter than the format requires is padded with zeroes.
pub fn decode(format: PixelFormat, width: u32, height: u32, raw: &[u8]) -> Result<Bitmap> {
    let expected = format.raw_len(width, height)?;
    let raw = if raw.len() < expected {
        let mut padded = raw.to_vec();
        padded.resize(expected, 0);
        Cow::Owned(padded)
    } else {
        Cow::Borrowed(&raw[..expected])
    };

    let mut bitmap = Bitmap::new(width, height);
    match format {
        PixelFormat::Bgra4444 => {
            for (pixel, packed) in bitmap.data.chunks_exact_mut(4).zip(raw.chunks_exact(2)) {
                pixel.copy_from_slice(&[
                    nibble(packed[0]),
                    nibble(packed[0] >> 4),
                    nibble(packed[1]),
                    nibble(packed[1] >> 4),
                ]);
            }
        }
        PixelFormat::Bgra8888 => bitmap.data.copy_from_slice(&raw),
        PixelFormat::Argb1555 => {
            for (pixel, packed) in bitmap.data.chunks_exact_mut(4).zip(raw.chunks_exact(2)) {
                let v = u16::from_le_bytes([packed[0], packed[1]]);
                pixel.copy_from_slice(&[
                    five((v & 0x1F) as u8),
                    five(((v >> 5) & 0x1F) as u8),
                    five(((v >> 10) & 0x1F) as u8),
                    if v & 0x8000 != 0 { 0xFF } else { 0x00 },
                ]);
            }
        }
        PixelFormat::Rgb565 => {
            for (pixel, packed) in bitmap.data.chunks_exact_mut(4).zip(raw.chunks_exact(2)) {
                let [r, g, b] = expand565(u16::from_le_bytes([packed[0], packed[1]]));
                pixel.copy_from_slice(&[b, g, r, 0xFF]);
            }
        }
        PixelFormat::Rgb565Tiled => {
            let tiles_wide = (width as usize).div_ceil(16);
            for y in 0..height {
                for x in 0..width {
                    let tile = (y as usize / 16) * tiles_wide + x as usize / 16;
                    let [r, g, b] = expand565(u16::from_le_bytes([raw[tile * 2], raw[tile * 2 + 1]]));
                    bitmap.set_pixel(x, y, [b, g, r, 0xFF]);
                }
            }
        }
        PixelFormat::Dxt3Legacy | PixelFormat::Dxt3 => decode_blocks(&mut bitmap, &raw, dxt3_alpha),
        PixelFormat::Dxt5 => decode_blocks(&mut bitmap, &raw, dxt5_alpha),
        PixelFormat::Other(code) => return Err(Error::UnsupportedPixelFormat(code)),
    }

    Ok(bitmap)
}

/// Encode a bitmap into the decompressed payload of `format`
pub fn encode(format: PixelFormat, bitmap: &Bitmap) -> Result<Vec<u8>> {
    let pixels = bitmap.data.chunks_exact(4);
    Ok(match format {
        PixelFormat::Bgra4444 => pixels
            .flat_map(|p| [(p[0] >> 4) | (p[1] & 0xF0), (p[2] >> 4) | (p[3] & 0xF0)])
            .collect(),
        PixelFormat::Bgra8888 => bitmap.data.clone(),
        PixelFormat::Argb1555 => pixels
            .flat_map(|p| {
                let alpha = if p[3] >= 0x80 { 0x8000 } else { 0 };
                let v = alpha
                    | ((p[2] as u16 >> 3) << 10)
                    | ((p[1] as u16 >> 3) << 5)
                    | (p[0] as u16 >> 3);
                v.to_le_bytes()
            })
            .collect(),
        PixelFormat::Rgb565 => pixels
            .flat_map(|p| pack565(p[2], p[1], p[0]).to_le_bytes())
            .collect(),
        PixelFormat::Rgb565Tiled => encode_tiles(bitmap),
        PixelFormat::Dxt3Legacy | PixelFormat::Dxt3 => encode_blocks(bitmap, dxt3_alpha_block),
        PixelFormat::Dxt5 => encode_blocks(bitmap, dxt5_alpha_block),
        PixelFormat::Other(code) => return Err(Error::UnsupportedPixelFormat(code)),
    })
}

fn nibble(n: u8) -> u8 {
    let n = n & 0x0F;
    n | (n << 4)
}

fn five(c: u8) -> u8 {
    (c << 3) | (c >> 2)
}

/// RGB565 to 8 bit `[r, g, b]`
fn expand565(v: u16) -> [u8; 3] {
    let r = ((v >> 11) & 0x1F) as u8;
    let g = ((v >> 5) & 0x3F) as u8;
    let b = (v & 0x1F) as u8;
    [five(r), (g << 2) | (g >> 4), five(b)]
}

fn pack565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

fn encode_tiles(bitmap: &Bitmap) -> Vec<u8> {
    let tiles_wide = bitmap.width.div_ceil(16);
    let tiles_high = bitmap.height.div_ceil(16);
    let mut out = Vec::with_capacity((tiles_wide * tiles_high * 2) as usize);

    for ty in 0..tiles_high {
        for tx in 0..tiles_wide {
            let mut sum = [0u32; 3];
            let mut count = 0u32;
            for y in ty * 16..((ty + 1) * 16).min(bitmap.height) {
                for x in tx * 16..((tx + 1) * 16).min(bitmap.width) {
                    let [b, g, r, _] = bitmap.pixel(x, y);
                    sum[0] += r as u32;
                    sum[1] += g as u32;
                    sum[2] += b as u32;
                    count += 1;
                }
            }
            let [r, g, b] = sum.map(|c| (c / count.max(1)) as u8);
            out.extend_from_slice(&pack565(r, g, b).to_le_bytes());
        }
    }

    out
}

/// Four color palette of a DXT color block, as `[r, g, b]`
fn color_table(c0: u16, c1: u16) -> [[u8; 3]; 4] {
    let a = expand565(c0);
    let b = expand565(c1);
    let mix = |f: fn(u32, u32) -> u32| -> [u8; 3] {
        [0, 1, 2].map(|i| f(a[i] as u32, b[i] as u32) as u8)
    };

    if c0 > c1 {
        [
            a,
            b,
            mix(|a, b| (2 * a + b + 1) / 3),
            mix(|a, b| (a + 2 * b + 1) / 3),
        ]
    } else {
        [a, b, mix(|a, b| (a + b) / 2), [0, 0, 0]]
    }
}

fn dxt3_alpha(block: &[u8]) -> [u8; 16] {
    let mut alpha = [0u8; 16];
    for (i, byte) in block[..8].iter().enumerate() {
        alpha[2 * i] = nibble(*byte);
        alpha[2 * i + 1] = nibble(byte >> 4);
    }
    alpha
}

fn alpha_table(a0: u8, a1: u8) -> [u8; 8] {
    let (a0, a1) = (a0 as u32, a1 as u32);
    let mut table = [a0 as u8, a1 as u8, 0, 0, 0, 0, 0, 0];
    if a0 > a1 {
        for i in 2..8u32 {
            table[i as usize] = (((8 - i) * a0 + (i - 1) * a1 + 3) / 7) as u8;
        }
    } else {
        for i in 2..6u32 {
            table[i as usize] = (((6 - i) * a0 + (i - 1) * a1 + 2) / 5) as u8;
        }
        table[6] = 0;
        table[7] = 255;
    }
    table
}

fn dxt5_alpha(block: &[u8]) -> [u8; 16] {
    let table = alpha_table(block[0], block[1]);
    let mut alpha = [0u8; 16];
    for (group, bytes) in block[2..8].chunks_exact(3).enumerate() {
        let bits = bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16;
        for j in 0..8 {
            alpha[group * 8 + j] = table[((bits >> (3 * j)) & 0x07) as usize];
        }
    }
    alpha
}

fn decode_blocks(bitmap: &mut Bitmap, raw: &[u8], alpha: fn(&[u8]) -> [u8; 16]) {
    let blocks_wide = (bitmap.width as usize).div_ceil(4);
    for (index, block) in raw.chunks_exact(16).enumerate() {
        let bx = (index % blocks_wide * 4) as u32;
        let by = (index / blocks_wide * 4) as u32;

        let alphas = alpha(&block[..8]);
        let colors = color_table(
            u16::from_le_bytes([block[8], block[9]]),
            u16::from_le_bytes([block[10], block[11]]),
        );

        for j in 0..4u32 {
            let row = block[12 + j as usize];
            for i in 0..4u32 {
                let (x, y) = (bx + i, by + j);
                if x >= bitmap.width || y >= bitmap.height {
                    continue;
                }
                let slot = (j * 4 + i) as usize;
                let [r, g, b] = colors[((row >> (2 * i)) & 0x03) as usize];
                bitmap.set_pixel(x, y, [b, g, r, alphas[slot]]);
            }
        }
    }
}

/// Pixels of the 4x4 block at `(bx, by)` that lie inside the bitmap, with their slot in the block
fn block_pixels(bitmap: &Bitmap, bx: u32, by: u32) -> Vec<(usize, [u8; 4])> {
    let mut pixels = Vec::with_capacity(16);
    for j in 0..4 {
        for i in 0..4 {
            let (x, y) = (bx + i, by + j);
            if x < bitmap.width && y < bitmap.height {
                pixels.push(((j * 4 + i) as usize, bitmap.pixel(x, y)));
            }
        }
    }
    pixels
}

fn distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(a, b)| (*a as i32 - *b as i32).pow(2) as u32)
        .sum()
}

fn nearest<T: Copy>(table: &[T], value: T, metric: impl Fn(T, T) -> u32) -> usize {
    let mut best = 0;
    for (i, candidate) in table.iter().enumerate() {
        if metric(*candidate, value) < metric(table[best], value) {
            best = i;
        }
    }
    best
}

/// The two colors of the block that lie farthest apart become the endpoints
fn color_block(pixels: &[(usize, [u8; 4])]) -> [u8; 8] {
    let rgb = |p: [u8; 4]| [p[2], p[1], p[0]];

    let (mut first, mut second) = (rgb(pixels[0].1), rgb(pixels[0].1));
    let mut widest = 0;
    for (n, (_, a)) in pixels.iter().enumerate() {
        for (_, b) in &pixels[n + 1..] {
            let d = distance(rgb(*a), rgb(*b));
            if d > widest {
                widest = d;
                first = rgb(*a);
                second = rgb(*b);
            }
        }
    }

    let mut c0 = pack565(first[0], first[1], first[2]);
    let mut c1 = pack565(second[0], second[1], second[2]);
    if c0 < c1 {
        std::mem::swap(&mut c0, &mut c1);
    }

    let mut indices = [0u8; 16];
    if c0 != c1 {
        let table = color_table(c0, c1);
        for (slot, pixel) in pixels {
            indices[*slot] = nearest(&table, rgb(*pixel), distance) as u8;
        }
    }

    let mut out = [0u8; 8];
    out[..2].copy_from_slice(&c0.to_le_bytes());
    out[2..4].copy_from_slice(&c1.to_le_bytes());
    for row in 0..4 {
        out[4 + row] = (0..4).fold(0u8, |acc, i| acc | indices[row * 4 + i] << (2 * i));
    }
    out
}

fn dxt3_alpha_block(pixels: &[(usize, [u8; 4])]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (slot, pixel) in pixels {
        out[slot / 2] |= (pixel[3] >> 4) << (4 * (slot % 2));
    }
    out
}

fn dxt5_alpha_block(pixels: &[(usize, [u8; 4])]) -> [u8; 8] {
    let a0 = pixels.iter().map(|(_, p)| p[3]).max().unwrap_or(0);
    let a1 = pixels.iter().map(|(_, p)| p[3]).min().unwrap_or(0);

    let mut indices = [0u32; 16];
    if a0 != a1 {
        let table = alpha_table(a0, a1);
        for (slot, pixel) in pixels {
            indices[*slot] = nearest(&table, pixel[3], |a, b| (a as i32 - b as i32).unsigned_abs()) as u32;
        }
    }

    let mut out = [a0, a1, 0, 0, 0, 0, 0, 0];
    for group in 0..2 {
        let bits = (0..8).fold(0u32, |acc, j| acc | indices[group * 8 + j] << (3 * j));
        out[2 + group * 3..5 + group * 3].copy_from_slice(&bits.to_le_bytes()[..3]);
    }
    out
}

fn encode_blocks(bitmap: &Bitmap, alpha: fn(&[(usize, [u8; 4])]) -> [u8; 8]) -> Vec<u8> {
    let blocks_wide = bitmap.width.div_ceil(4);
    let blocks_high = bitmap.height.div_ceil(4);
    let mut out = Vec::with_capacity((blocks_wide * blocks_high * 16) as usize);

    for by in 0..blocks_high {
        for bx in 0..blocks_wide {
            let pixels = block_pixels(bitmap, bx * 4, by * 4);
            out.extend_from_slice(&alpha(&pixels));
            out.extend_from_slice(&color_block(&pixels));
        }
    }

    out
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{decode, encode, Bitmap, PixelFormat};
    use crate::error::{Error, Result};

    fn gradient(width: u32, height: u32) -> Bitmap {
        let mut bitmap = Bitmap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let v = ((x * 31 + y * 17) % 256) as u8;
                bitmap.set_pixel(x, y, [v, v.wrapping_mul(3), 255 - v, v ^ 0x5A]);
            }
        }
        bitmap
    }

    /// Two colors far apart in every 4x4 block, alternating by pixel
    fn two_tone(width: u32, height: u32) -> Bitmap {
        let mut bitmap = Bitmap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let pixel = if (x + y) % 2 == 0 {
                    [0xFF, 0xFF, 0xFF, 0xFF]
                } else {
                    [0x00, 0x00, 0xFF, 0x00]
                };
                bitmap.set_pixel(x, y, pixel);
            }
        }
        bitmap
    }

    #[test]
    fn bgra4444_nibbles() -> Result<()> {
        let bitmap = decode(PixelFormat::Bgra4444, 1, 1, &[0x21, 0x43])?;
        assert_eq!(bitmap.pixel(0, 0), [0x11, 0x22, 0x33, 0x44]);
        Ok(())
    }

    #[test]
    fn rgb565_expansion() -> Result<()> {
        let bitmap = decode(PixelFormat::Rgb565, 2, 1, &[0x00, 0xF8, 0x1F, 0x00])?;
        assert_eq!(bitmap.pixel(0, 0), [0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(bitmap.pixel(1, 0), [0xFF, 0x00, 0x00, 0xFF]);
        Ok(())
    }

    #[test]
    fn argb1555_alpha_bit() -> Result<()> {
        let bitmap = decode(PixelFormat::Argb1555, 2, 1, &[0xE0, 0x83, 0xE0, 0x03])?;
        assert_eq!(bitmap.pixel(0, 0), [0x00, 0xFF, 0x00, 0xFF]);
        assert_eq!(bitmap.pixel(1, 0), [0x00, 0xFF, 0x00, 0x00]);
        Ok(())
    }

    #[test]
    fn exact_formats_survive_a_second_pass() -> Result<()> {
        let source = gradient(37, 21);
        for format in [
            PixelFormat::Bgra4444,
            PixelFormat::Bgra8888,
            PixelFormat::Argb1555,
            PixelFormat::Rgb565,
            PixelFormat::Rgb565Tiled,
        ] {
            let once = decode(format, 37, 21, &encode(format, &source)?)?;
            let twice = decode(format, 37, 21, &encode(format, &once)?)?;
            assert_eq!(once, twice, "{format}");
        }
        Ok(())
    }

    #[test]
    fn tiled_format_replicates_samples() -> Result<()> {
        let raw = [0x00, 0xF8, 0x1F, 0x00];
        let bitmap = decode(PixelFormat::Rgb565Tiled, 20, 3, &raw)?;

        assert_eq!(PixelFormat::Rgb565Tiled.raw_len(20, 3)?, 4);
        assert_eq!(bitmap.pixel(15, 2), [0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(bitmap.pixel(16, 0), [0xFF, 0x00, 0x00, 0xFF]);
        Ok(())
    }

    #[test]
    fn dxt3_block() -> Result<()> {
        #[rustfmt::skip]
        let raw = [
            // alpha nibbles: F, 0, then 8 everywhere else
            0x0F, 0x88, 0x88, 0x88, 0x88, 0x88, 0x88, 0x88,
            // c0 white, c1 black
            0xFF, 0xFF, 0x00, 0x00,
            // indices 0, 1, 2, 3 on every row
            0xE4, 0xE4, 0xE4, 0xE4,
        ];
        let bitmap = decode(PixelFormat::Dxt3, 4, 4, &raw)?;

        assert_eq!(bitmap.pixel(0, 0), [0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(bitmap.pixel(1, 0), [0x00, 0x00, 0x00, 0x00]);
        assert_eq!(bitmap.pixel(2, 1), [0xAA, 0xAA, 0xAA, 0x88]);
        assert_eq!(bitmap.pixel(3, 3), [0x55, 0x55, 0x55, 0x88]);

        let again = decode(PixelFormat::Dxt3, 4, 4, &encode(PixelFormat::Dxt3, &bitmap)?)?;
        assert_eq!(again, bitmap);
        Ok(())
    }

    #[test]
    fn dxt5_block() -> Result<()> {
        #[rustfmt::skip]
        let raw = [
            // a0 = 255, a1 = 0, first row uses indices 0, 1, 2, 7
            0xFF, 0x00, 0x88, 0x0E, 0x00, 0x00, 0x00, 0x00,
            0xFF, 0xFF, 0x00, 0x00,
            0x04, 0x04, 0x04, 0x04,
        ];
        let bitmap = decode(PixelFormat::Dxt5, 4, 4, &raw)?;

        assert_eq!(bitmap.pixel(0, 0)[3], 255);
        assert_eq!(bitmap.pixel(1, 0)[3], 0);
        assert_eq!(bitmap.pixel(2, 0)[3], 219);
        assert_eq!(bitmap.pixel(3, 0)[3], 36);
        assert_eq!(bitmap.pixel(0, 0)[..3], [0xFF, 0xFF, 0xFF]);
        assert_eq!(bitmap.pixel(1, 0)[..3], [0x00, 0x00, 0x00]);

        let again = decode(PixelFormat::Dxt5, 4, 4, &encode(PixelFormat::Dxt5, &bitmap)?)?;
        assert_eq!(again, bitmap);
        Ok(())
    }

    #[test]
    fn block_formats_are_stable_after_one_pass() -> Result<()> {
        let source = two_tone(10, 7);
        for format in [PixelFormat::Dxt3, PixelFormat::Dxt5, PixelFormat::Dxt3Legacy] {
            assert_eq!(format.raw_len(10, 7)?, 3 * 2 * 16);
            let once = decode(format, 10, 7, &encode(format, &source)?)?;
            let twice = decode(format, 10, 7, &encode(format, &once)?)?;

            assert_eq!(once, source, "{format}");
            assert_eq!(twice, once, "{format}");
        }
        Ok(())
    }

    #[test]
    fn unknown_format_is_recoverable() {
        let format = PixelFormat::from(4);
        assert_eq!(format, PixelFormat::Other(4));
        assert!(matches!(
            decode(format, 1, 1, &[0; 4]),
            Err(Error::UnsupportedPixelFormat(4))
        ));

        let placeholder = Bitmap::placeholder(0, 0);
        assert_eq!((placeholder.width, placeholder.height), (1, 1));
    }
}
