// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Raw video frames and plane layouts.
//!
//! A [`VideoFrame`] owns one contiguous allocation and describes its planes
//! as byte offsets and strides into it. An [`ImageLayout`] is the layout the
//! component negotiated for its input port; frames that already match it
//! can be handed to the component without copying, anything else is copied
//! plane by plane with [`copy_planes`].

use crate::{
    backend::ColorFormat,
    error::{Error, Result},
};
use std::fmt;

/// Maximum number of planes of any supported format.
pub const MAX_PLANES: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4:2:0 with an interleaved chroma plane.
    Nv12,
    /// 4:2:0 with separate U and V planes.
    Yuv420p,
}

impl PixelFormat {
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            PixelFormat::Yuv420p => 3,
        }
    }

    /// Whether a component colour format carries this pixel layout.
    pub fn accepts(self, color: ColorFormat) -> bool {
        match self {
            PixelFormat::Nv12 => color == ColorFormat::Yuv420SemiPlanar,
            PixelFormat::Yuv420p => matches!(
                color,
                ColorFormat::Yuv420Planar | ColorFormat::Yuv420PackedPlanar
            ),
        }
    }

    /// Bytes per row and number of rows of plane `index` for an image of
    /// `width` x `height` pixels.
    fn plane_extent(self, index: usize, width: usize, height: usize) -> (usize, usize) {
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);
        match (self, index) {
            (_, 0) => (width, height),
            (PixelFormat::Nv12, 1) => (chroma_width * 2, chroma_height),
            (PixelFormat::Yuv420p, 1 | 2) => (chroma_width, chroma_height),
            _ => (0, 0),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Nv12 => f.write_str("nv12"),
            PixelFormat::Yuv420p => f.write_str("yuv420p"),
        }
    }
}

/// One plane of an image: where it starts and how far apart its rows are.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    pub stride: usize,
}

/// Plane layout of a contiguous image buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageLayout {
    pub format: PixelFormat,
    pub planes: [Plane; MAX_PLANES],
    /// Total number of bytes covered by all planes.
    pub size: usize,
}

impl ImageLayout {
    /// Layout of an image whose luma rows are `stride` bytes apart and whose
    /// planes are `slice_height` rows tall, all planes stored back to back.
    pub fn new(format: PixelFormat, stride: usize, slice_height: usize) -> Self {
        let mut planes = [Plane::default(); MAX_PLANES];
        let mut offset = 0;
        for (index, plane) in planes.iter_mut().enumerate().take(format.plane_count()) {
            let (row_bytes, rows) = format.plane_extent(index, stride, slice_height);
            *plane = Plane {
                offset,
                stride: row_bytes,
            };
            offset += row_bytes * rows;
        }
        Self {
            format,
            planes,
            size: offset,
        }
    }

    /// Whether `frame` is already laid out exactly like this image, so that
    /// its memory can be handed to the component as is.
    pub fn matches(&self, frame: &VideoFrame) -> bool {
        if frame.format != self.format {
            return false;
        }
        let base = frame.planes[0].offset;
        let count = self.format.plane_count();
        let strides_match = (0..count).all(|i| frame.planes[i].stride == self.planes[i].stride);
        let offsets_match = (1..count).all(|i| {
            frame.planes[i].offset.checked_sub(base) == Some(self.planes[i].offset)
        });
        strides_match && offsets_match && frame.data.len().saturating_sub(base) >= self.size
    }
}

/// Picture type hint supplied with an input frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PictureType {
    #[default]
    Unknown,
    Intra,
    Predicted,
    Bidirectional,
}

/// A raw video frame to be encoded.
pub struct VideoFrame {
    data: Vec<u8>,
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: [Plane; MAX_PLANES],
    /// Presentation timestamp in the session's time base.
    pub pts: i64,
    pub picture_type: PictureType,
}

impl VideoFrame {
    /// Wraps `data` as a frame with explicit plane placement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] if the dimensions are zero or any
    /// plane would reach past the end of `data`.
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: [Plane; MAX_PLANES],
        data: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame(format!(
                "empty frame {}x{}",
                width, height
            )));
        }
        for (index, plane) in planes.iter().enumerate().take(format.plane_count()) {
            let (row_bytes, rows) = format.plane_extent(index, width as usize, height as usize);
            if plane.stride < row_bytes {
                return Err(Error::InvalidFrame(format!(
                    "plane {} stride {} is shorter than a row of {} bytes",
                    index, plane.stride, row_bytes
                )));
            }
            let end = rows
                .checked_sub(1)
                .and_then(|last| plane.stride.checked_mul(last))
                .and_then(|span| span.checked_add(plane.offset))
                .and_then(|span| span.checked_add(row_bytes))
                .ok_or_else(|| {
                    Error::InvalidFrame(format!(
                        "plane {} placement overflows (offset {}, stride {})",
                        index, plane.offset, plane.stride
                    ))
                })?;
            if end > data.len() {
                return Err(Error::InvalidFrame(format!(
                    "plane {} ends at byte {} but the frame holds {}",
                    index,
                    end,
                    data.len()
                )));
            }
        }
        Ok(Self {
            data,
            format,
            width,
            height,
            planes,
            pts: 0,
            picture_type: PictureType::Unknown,
        })
    }

    /// Wraps `data` laid out as described by `layout`.
    pub fn with_layout(
        layout: &ImageLayout,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<Self> {
        Self::new(layout.format, width, height, layout.planes, data)
    }

    /// Wraps `data` holding tightly packed planes (stride equal to width).
    pub fn packed(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let layout = ImageLayout::new(format, width as usize, height as usize);
        Self::with_layout(&layout, width, height, data)
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_picture_type(mut self, picture_type: PictureType) -> Self {
        self.picture_type = picture_type;
        self
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes[..self.format.plane_count()]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Memory from the start of plane `index` to the end of the frame.
    pub fn plane(&self, index: usize) -> &[u8] {
        &self.data[self.planes[index].offset..]
    }

    /// The visible bytes of row `row` in plane `index`.
    pub fn row(&self, index: usize, row: usize) -> &[u8] {
        let (row_bytes, _) =
            self.format
                .plane_extent(index, self.width as usize, self.height as usize);
        let start = self.planes[index].offset + row * self.planes[index].stride;
        &self.data[start..start + row_bytes]
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("planes", &self.planes())
            .field("len", &self.data.len())
            .field("pts", &self.pts)
            .field("picture_type", &self.picture_type)
            .finish()
    }
}

impl fmt::Display for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} pts:{}",
            self.width, self.height, self.format, self.pts
        )
    }
}

/// Copies the visible rows of every plane of `frame` into `dst`, laid out
/// as `layout`. Returns the number of bytes the layout occupies.
///
/// # Errors
///
/// Returns [`Error::InvalidFrame`] if the frame format differs from the
/// layout, the frame is larger than the layout, or `dst` is too small.
pub fn copy_planes(frame: &VideoFrame, layout: &ImageLayout, dst: &mut [u8]) -> Result<usize> {
    if frame.format != layout.format {
        return Err(Error::InvalidFrame(format!(
            "frame is {} but the port expects {}",
            frame.format, layout.format
        )));
    }
    if dst.len() < layout.size {
        return Err(Error::InvalidFrame(format!(
            "destination holds {} bytes, layout needs {}",
            dst.len(),
            layout.size
        )));
    }
    let (width, height) = (frame.width as usize, frame.height as usize);
    for index in 0..layout.format.plane_count() {
        let (row_bytes, rows) = layout.format.plane_extent(index, width, height);
        let plane = layout.planes[index];
        if row_bytes > plane.stride {
            return Err(Error::InvalidFrame(format!(
                "frame row of {} bytes exceeds port stride {}",
                row_bytes, plane.stride
            )));
        }
        let plane_end = layout
            .planes
            .get(index + 1)
            .filter(|next| next.stride > 0)
            .map_or(layout.size, |next| next.offset);
        if plane.offset + plane.stride * rows > plane_end {
            return Err(Error::InvalidFrame(format!(
                "frame of {} rows exceeds port slice height",
                height
            )));
        }
        for row in 0..rows {
            let start = plane.offset + row * plane.stride;
            dst[start..start + row_bytes].copy_from_slice(frame.row(index, row));
        }
    }
    Ok(layout.size)
}
