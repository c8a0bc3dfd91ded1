//! Application icon rasterization and transport encoding.
//!
//! Icons arrive either already rasterized ([`Icon::Bitmap`]) or as something
//! that knows how to paint itself ([`Icon::Drawable`]). Both end up as an RGBA
//! [`Bitmap`], which is PNG-encoded and then base64-encoded for the JSON body.

use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::Crc;
use flate2::write::ZlibEncoder;

/// Edge length used when a drawable reports no intrinsic size.
pub const DEFAULT_ICON_SIZE: u32 = 144;

/// Largest canvas edge a drawable may ask for.
pub const MAX_ICON_EDGE: u32 = 1024;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// An RGBA8 raster, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// A fully transparent bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Wrap existing RGBA data. `None` when the length does not match.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize * 4).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * 4;
        let start = y as usize * stride;
        &self.pixels[start..start + stride]
    }
}

/// A drawing surface backed by a [`Bitmap`].
#[derive(Debug)]
pub struct Canvas {
    bitmap: Bitmap,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            bitmap: Bitmap::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height
    }

    /// Set one pixel; out-of-bounds writes are clipped.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.bitmap.width || y >= self.bitmap.height {
            return;
        }
        let i = (y as usize * self.bitmap.width as usize + x as usize) * 4;
        self.bitmap.pixels[i..i + 4].copy_from_slice(&rgba);
    }

    /// Fill an axis-aligned rectangle, clipped to the canvas.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.bitmap.width);
        let y_end = y.saturating_add(height).min(self.bitmap.height);
        for py in y..y_end {
            for px in x..x_end {
                self.set_pixel(px, py, rgba);
            }
        }
    }

    /// Fill a circle centred at (`cx`, `cy`).
    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, rgba: [u8; 4]) {
        let r2 = radius * radius;
        for py in 0..self.bitmap.height {
            for px in 0..self.bitmap.width {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r2 {
                    self.set_pixel(px, py, rgba);
                }
            }
        }
    }

    pub fn into_bitmap(self) -> Bitmap {
        self.bitmap
    }
}

/// Something that paints itself, such as a vector or layered icon.
pub trait Drawable: Send + Sync {
    /// Natural size in pixels, if the drawable has one.
    fn intrinsic_size(&self) -> Option<(u32, u32)>;

    /// Paint onto `canvas`, scaling to its full bounds.
    fn draw(&self, canvas: &mut Canvas);
}

/// An application icon as provided by the application directory.
pub enum Icon {
    Bitmap(Bitmap),
    Drawable(Box<dyn Drawable>),
}

impl std::fmt::Debug for Icon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitmap(b) => write!(f, "Icon::Bitmap({}x{})", b.width, b.height),
            Self::Drawable(d) => write!(f, "Icon::Drawable({:?})", d.intrinsic_size()),
        }
    }
}

/// Rasterize `icon`. Drawables without a usable intrinsic size, or with an
/// edge over [`MAX_ICON_EDGE`], are drawn onto a `default_size`×`default_size`
/// canvas (itself capped at [`MAX_ICON_EDGE`]).
pub fn render(icon: &Icon, default_size: u32) -> Option<Bitmap> {
    match icon {
        Icon::Bitmap(bitmap) => (!bitmap.is_empty()).then(|| bitmap.clone()),
        Icon::Drawable(drawable) => {
            let fallback = default_size.min(MAX_ICON_EDGE);
            let fits = |edge: u32| (1..=MAX_ICON_EDGE).contains(&edge);
            let (w, h) = match drawable.intrinsic_size() {
                Some((w, h)) if fits(w) && fits(h) => (w, h),
                Some((w, h)) if w > 0 && h > 0 => {
                    log::debug!("drawable icon reports {w}x{h}, using {fallback}x{fallback}");
                    (fallback, fallback)
                }
                _ => (fallback, fallback),
            };
            if w == 0 || h == 0 {
                return None;
            }
            log::debug!("rasterizing drawable icon at {w}x{h}");
            let mut canvas = Canvas::new(w, h);
            drawable.draw(&mut canvas);
            Some(canvas.into_bitmap())
        }
    }
}

// ---------------------------------------------------------------------------
// PNG
// ---------------------------------------------------------------------------

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
}

/// Encode `bitmap` as an 8-bit RGBA PNG (no filtering, zlib default level).
pub fn encode_png(bitmap: &Bitmap) -> std::io::Result<Vec<u8>> {
    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&bitmap.width.to_be_bytes());
    ihdr.extend_from_slice(&bitmap.height.to_be_bytes());
    // bit depth 8, colour type 6 (RGBA), deflate, adaptive filtering, no interlace
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    for y in 0..bitmap.height {
        encoder.write_all(&[0])?;
        encoder.write_all(bitmap.row(y))?;
    }
    let idat = encoder.finish()?;

    let mut out = Vec::with_capacity(PNG_SIGNATURE.len() + idat.len() + 64);
    out.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut out, b"IHDR", &ihdr);
    write_chunk(&mut out, b"IDAT", &idat);
    write_chunk(&mut out, b"IEND", &[]);
    Ok(out)
}

/// Render, PNG-encode and base64-encode an icon. `None` on any failure.
pub fn icon_to_base64(icon: &Icon, default_size: u32) -> Option<String> {
    let bitmap = render(icon, default_size)?;
    match encode_png(&bitmap) {
        Ok(png) => {
            log::debug!("icon encoded to {} PNG bytes", png.len());
            Some(STANDARD.encode(png))
        }
        Err(e) => {
            log::warn!("icon encoding failed: {e}");
            None
        }
    }
}
