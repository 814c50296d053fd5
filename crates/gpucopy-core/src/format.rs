//! Pixel format classification.
//!
//! Pure predicates and tables over [`Format`]. Nothing here touches a
//! device; the engine and external routing logic both call these to decide
//! which kernel (if any) can move a frame.
//!
//! # Layout families
//!
//! ```text
//! single plane   RGB4 BGR4 ARGB16 ABGR16 R16 YUY2 AYUV Y410
//!                [row 0 ........ stride]
//!                [row 1 ........ stride]
//!
//! semi-planar    NV12 P010
//!                [Y rows      x heightStride]
//!                [UV rows     x height / 2  ]
//! ```
//!
//! `A2RGB10` and `UYVY` have a pixel size but no linear kernel, so they only
//! move surface-to-surface. `YV12` is three-plane and unsupported everywhere.

use std::fmt;

/// Pixel formats known to the copy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 8-bit 4:2:0, Y plane followed by interleaved UV plane.
    Nv12,
    /// 16-bit container 4:2:0 (10 significant bits), NV12 layout.
    P010,
    /// 8-bit packed 4:2:2, Y0 U Y1 V.
    Yuy2,
    /// 8-bit packed 4:4:4 with alpha.
    Ayuv,
    /// 10-bit packed 4:4:4 with 2-bit alpha.
    Y410,
    /// 8-bit BGRA in memory order (B, G, R, A).
    Rgb4,
    /// 8-bit RGBA in memory order (R, G, B, A).
    Bgr4,
    /// 16-bit per channel, B G R A lanes.
    Argb16,
    /// 16-bit per channel, R G B A lanes.
    Abgr16,
    /// Single 16-bit channel.
    R16,
    /// 10-bit RGB with 2-bit alpha.
    A2rgb10,
    /// 8-bit packed 4:2:2, U Y0 V Y1.
    Uyvy,
    /// 8-bit three-plane 4:2:0.
    Yv12,
}

impl Format {
    /// All formats, in declaration order.
    pub const ALL: [Format; 13] = [
        Format::Nv12,
        Format::P010,
        Format::Yuy2,
        Format::Ayuv,
        Format::Y410,
        Format::Rgb4,
        Format::Bgr4,
        Format::Argb16,
        Format::Abgr16,
        Format::R16,
        Format::A2rgb10,
        Format::Uyvy,
        Format::Yv12,
    ];

    /// Four-character code as a little-endian `u32`.
    pub const fn fourcc(self) -> u32 {
        let tag: &[u8; 4] = match self {
            Format::Nv12 => b"NV12",
            Format::P010 => b"P010",
            Format::Yuy2 => b"YUY2",
            Format::Ayuv => b"AYUV",
            Format::Y410 => b"Y410",
            Format::Rgb4 => b"RGB4",
            Format::Bgr4 => b"BGR4",
            Format::Argb16 => b"RG16",
            Format::Abgr16 => b"BG16",
            Format::R16 => b"R16U",
            Format::A2rgb10 => b"RG10",
            Format::Uyvy => b"UYVY",
            Format::Yv12 => b"YV12",
        };
        u32::from_le_bytes(*tag)
    }

    /// Looks a format up by its four-character code.
    pub fn from_fourcc(code: u32) -> Option<Format> {
        Format::ALL.into_iter().find(|f| f.fourcc() == code)
    }

    /// Short display name.
    pub const fn name(self) -> &'static str {
        match self {
            Format::Nv12 => "NV12",
            Format::P010 => "P010",
            Format::Yuy2 => "YUY2",
            Format::Ayuv => "AYUV",
            Format::Y410 => "Y410",
            Format::Rgb4 => "RGB4",
            Format::Bgr4 => "BGR4",
            Format::Argb16 => "ARGB16",
            Format::Abgr16 => "ABGR16",
            Format::R16 => "R16",
            Format::A2rgb10 => "A2RGB10",
            Format::Uyvy => "UYVY",
            Format::Yv12 => "YV12",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Bytes per pixel of the first plane. `0` means the engine cannot move it.
///
/// For packed 4:2:2 formats this is the average over a macropixel.
pub const fn bytes_per_pixel(format: Format) -> usize {
    match format {
        Format::Nv12 => 1,
        Format::P010 | Format::R16 | Format::Yuy2 | Format::Uyvy => 2,
        Format::Rgb4 | Format::Bgr4 | Format::Ayuv | Format::Y410 | Format::A2rgb10 => 4,
        Format::Argb16 | Format::Abgr16 => 8,
        Format::Yv12 => 0,
    }
}

/// Single-plane formats with a linear host kernel.
pub const fn is_single_plane(format: Format) -> bool {
    matches!(
        format,
        Format::Rgb4
            | Format::Bgr4
            | Format::Argb16
            | Format::Abgr16
            | Format::R16
            | Format::Yuy2
            | Format::Ayuv
            | Format::Y410
    )
}

/// Two-plane 4:2:0 layouts whose chroma plane adds `height / 2` rows.
pub const fn is_semi_planar_like(format: Format) -> bool {
    matches!(format, Format::Nv12 | Format::P010)
}

/// 8-bit RGB formats, limited to 4088x4088 on host paths.
pub const fn is_rgb8(format: Format) -> bool {
    matches!(format, Format::Rgb4 | Format::Bgr4)
}

/// 16-bit RGB formats, limited to 10240x10240 on host paths.
pub const fn is_rgb16(format: Format) -> bool {
    matches!(format, Format::Argb16 | Format::Abgr16)
}

/// Whether moving `src` into `dst` requires exchanging the R and B channels.
pub const fn needs_channel_swap(dst: Format, src: Format) -> bool {
    matches!(
        (dst, src),
        (Format::Rgb4, Format::Bgr4)
            | (Format::Bgr4, Format::Rgb4)
            | (Format::Argb16, Format::Abgr16)
            | (Format::Abgr16, Format::Argb16)
    )
}

/// Whether a P010 copy must re-justify samples between MSB and LSB layouts.
pub const fn needs_bit_shift(dst_shift: u16, src_shift: u16, format: Format) -> bool {
    matches!(format, Format::P010) && dst_shift != src_shift
}

/// Shift amount for a given luma bit depth (`16 - depth`), `None` when out of range.
pub const fn shift_for_bit_depth(bit_depth_luma: u16) -> Option<u32> {
    if bit_depth_luma == 0 || bit_depth_luma > 16 {
        None
    } else {
        Some(16 - bit_depth_luma as u32)
    }
}
