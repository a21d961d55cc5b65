//! Stream geometry and the mapping of codec and color formats to V4L2 pixel formats.
use crate::{Format, PixelFormat, PlaneLayout, Rect};

/// Compression formats supported by the MFC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodingType {
    #[default]
    Unknown,
    Avc,
    Mpeg4,
    H263,
    Mpeg2,
    /// VC-1 advanced profile (SMPTE 421M annex G).
    Vc1,
    /// VC-1 simple/main profile in an RCV container (SMPTE 421M annex L).
    Vc1Rcv,
    Vp8,
}

impl CodingType {
    /// Pixel format of the bitstream. Unsupported codings fall back to H.264.
    pub fn pixel_format(self) -> PixelFormat {
        PixelFormat::from(match self {
            CodingType::Avc => b"H264",
            CodingType::Mpeg4 => b"MPG4",
            CodingType::H263 => b"H263",
            CodingType::Mpeg2 => b"MPG2",
            CodingType::Vc1 => b"VC1G",
            CodingType::Vc1Rcv => b"VC1L",
            CodingType::Vp8 => b"VP80",
            CodingType::Unknown => b"H264",
        })
    }
}

/// Layouts of raw frames supported by the MFC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorFormat {
    #[default]
    Unknown,
    Nv12,
    Nv21,
    /// NV12 with 16x16 macroblock tiling.
    Nv12Tiled,
}

impl ColorFormat {
    /// Multi-planar pixel format of the frames. Unsupported layouts fall back to NV12.
    pub fn pixel_format(self) -> PixelFormat {
        PixelFormat::from(match self {
            ColorFormat::Nv12Tiled => b"VM12",
            ColorFormat::Nv21 => b"NM21",
            ColorFormat::Nv12 | ColorFormat::Unknown => b"NM12",
        })
    }
}

/// Negotiated geometry of one direction of a codec.
///
/// Only `coding` is relevant to the bitstream direction, and only `color` to the frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    /// Size of a compressed buffer, or of a whole frame.
    pub stream_size: u32,
    pub crop: Rect,
    pub coding: CodingType,
    pub color: ColorFormat,
    /// Number of planes of the frames, for the frame direction.
    pub num_planes: u32,
}

impl Geometry {
    /// V4L2 format describing a bitstream with this geometry.
    pub fn bitstream_format(&self) -> Format {
        Format {
            width: self.width,
            height: self.height,
            pixelformat: self.coding.pixel_format(),
            plane_fmt: vec![PlaneLayout {
                sizeimage: self.stream_size,
                bytesperline: 0,
            }],
        }
    }

    /// V4L2 format describing frames with this geometry, laid out in `num_planes` planes.
    pub fn frame_format(&self, num_planes: usize) -> Format {
        Format {
            width: self.width,
            height: self.height,
            pixelformat: self.color.pixel_format(),
            plane_fmt: vec![Default::default(); num_planes],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coding_pixel_formats() {
        assert_eq!(CodingType::Avc.pixel_format().to_string(), "H264");
        assert_eq!(CodingType::Vc1.pixel_format().to_string(), "VC1G");
        assert_eq!(CodingType::Vc1Rcv.pixel_format().to_string(), "VC1L");
        assert_eq!(CodingType::Vp8.pixel_format().to_string(), "VP80");
        assert_eq!(
            CodingType::Unknown.pixel_format(),
            CodingType::Avc.pixel_format()
        );
    }

    #[test]
    fn color_pixel_formats() {
        assert_eq!(ColorFormat::Nv12Tiled.pixel_format().to_string(), "VM12");
        assert_eq!(ColorFormat::Nv21.pixel_format().to_string(), "NM21");
        assert_eq!(ColorFormat::Unknown.pixel_format().to_string(), "NM12");
    }

    #[test]
    fn geometry_formats() {
        let geometry = Geometry {
            width: 640,
            height: 480,
            stream_size: 1024 * 1024,
            coding: CodingType::Mpeg4,
            color: ColorFormat::Nv21,
            ..Default::default()
        };

        let bitstream = geometry.bitstream_format();
        assert_eq!(bitstream.pixelformat.to_string(), "MPG4");
        assert_eq!(bitstream.plane_fmt.len(), 1);
        assert_eq!(bitstream.plane_fmt[0].sizeimage, 1024 * 1024);

        let frames = geometry.frame_format(2);
        assert_eq!(frames.pixelformat.to_string(), "NM21");
        assert_eq!(frames.plane_fmt.len(), 2);
        assert_eq!((frames.width, frames.height), (640, 480));
    }
}
