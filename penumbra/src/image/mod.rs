//! Pixel grids: science image, bit-flag mask and segmentation map.

mod segmap;


use common::Buffer2;
use glam::{DVec2, IVec2};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::dilation::dilate_disk;
use crate::error::{Error, Result};

pub use segmap::{BoundingBox, FootprintInfo, Peak, SegmentationMap, MAX_PEAKS};

// ============================================================================
// Image
// ============================================================================

/// A 2D grid of pixel intensities placed at `origin` within a larger mosaic.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub pixels: Buffer2<f32>,
    pub origin: IVec2,
}

impl Image {
    pub fn new(pixels: Buffer2<f32>) -> Self {
        Self {
            pixels,
            origin: IVec2::ZERO,
        }
    }

    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self::new(Buffer2::new_filled(width, height, value))
    }

    pub fn with_origin(mut self, origin: IVec2) -> Self {
        self.origin = origin;
        self
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.pixels.shape()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.pixels[(x, y)]
    }

    /// Fail with `ShapeMismatch` unless `other` has this image's dimensions.
    pub fn check_shape<T>(&self, what: &'static str, other: &Buffer2<T>) -> Result<()> {
        if self.pixels.same_shape(other) {
            Ok(())
        } else {
            Err(Error::shape(what, self.shape(), other.shape()))
        }
    }

    /// Element-wise `self - model`, keeping the origin.
    pub fn subtract(&self, model: &Buffer2<f32>) -> Result<Image> {
        self.check_shape("subtracted model", model)?;
        let pixels = Buffer2::from_fn(self.width(), self.height(), |x, y| {
            self.pixels[(x, y)] - model[(x, y)]
        });
        Ok(Image {
            pixels,
            origin: self.origin,
        })
    }

    pub fn map(&self, f: impl FnMut(&f32) -> f32) -> Image {
        Image {
            pixels: self.pixels.map(f),
            origin: self.origin,
        }
    }

    /// Local pixel position expressed in mosaic coordinates.
    #[inline]
    pub fn to_mosaic(&self, x: f64, y: f64) -> DVec2 {
        DVec2::new(x + self.origin.x as f64, y + self.origin.y as f64)
    }
}

// ============================================================================
// Mask planes
// ============================================================================

/// Named mask conditions. Each plane owns exactly one bit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskPlane {
    Bad,
    Saturated,
    Interpolated,
    #[strum(serialize = "CR")]
    #[serde(rename = "CR")]
    Cr,
    Edge,
    Detected,
    DetectedNegative,
    Suspect,
    NoData,
    BrightObject,
    Clipped,
    Crosstalk,
    NotDeblended,
    #[strum(serialize = "UNMASKEDNAN")]
    #[serde(rename = "UNMASKEDNAN")]
    UnmaskedNan,
    ThreshHigh,
    ThreshLow,
}

impl MaskPlane {
    #[inline]
    pub const fn bit(self) -> u32 {
        match self {
            MaskPlane::Bad => 1,
            MaskPlane::Saturated => 1 << 1,
            MaskPlane::Interpolated => 1 << 2,
            MaskPlane::Cr => 1 << 3,
            MaskPlane::Edge => 1 << 4,
            MaskPlane::Detected => 1 << 5,
            MaskPlane::DetectedNegative => 1 << 6,
            MaskPlane::Suspect => 1 << 7,
            MaskPlane::NoData => 1 << 8,
            MaskPlane::BrightObject => 1 << 9,
            MaskPlane::Clipped => 1 << 10,
            MaskPlane::Crosstalk => 1 << 11,
            MaskPlane::NotDeblended => 1 << 12,
            MaskPlane::UnmaskedNan => 1 << 13,
            MaskPlane::ThreshHigh => 1 << 14,
            MaskPlane::ThreshLow => 1 << 15,
        }
    }

    /// Resolve a plane by its canonical name.
    pub fn from_name(name: &str) -> Result<MaskPlane> {
        name.parse()
            .map_err(|_| Error::MissingFlag(name.to_string()))
    }

    /// All planes whose bit is set in `value`, in bit order.
    pub fn decode(value: u32) -> Vec<MaskPlane> {
        MaskPlane::iter().filter(|p| value & p.bit() != 0).collect()
    }
}

/// A set of mask planes packed into a bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct MaskFlags(u32);

impl MaskFlags {
    pub const NONE: MaskFlags = MaskFlags(0);

    pub fn from_planes(planes: &[MaskPlane]) -> Self {
        MaskFlags(planes.iter().fold(0, |acc, p| acc | p.bit()))
    }

    /// Resolve every name, failing with `MissingFlag` on the first unknown one.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut bits = 0;
        for name in names {
            bits |= MaskPlane::from_name(name.as_ref())?.bit();
        }
        Ok(MaskFlags(bits))
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn matches(self, value: u32) -> bool {
        value & self.0 != 0
    }

    #[inline]
    pub fn contains(self, plane: MaskPlane) -> bool {
        self.0 & plane.bit() != 0
    }

    #[inline]
    pub fn union(self, other: MaskFlags) -> MaskFlags {
        MaskFlags(self.0 | other.0)
    }

    #[inline]
    pub fn without(self, other: MaskFlags) -> MaskFlags {
        MaskFlags(self.0 & !other.0)
    }

    pub fn planes(self) -> Vec<MaskPlane> {
        MaskPlane::decode(self.0)
    }
}

impl From<MaskPlane> for MaskFlags {
    fn from(plane: MaskPlane) -> Self {
        MaskFlags(plane.bit())
    }
}

// ============================================================================
// Mask
// ============================================================================

/// Per-pixel bit flags, same dimensions as the image they describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    bits: Buffer2<u32>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            bits: Buffer2::new_default(width, height),
        }
    }

    pub fn from_bits(bits: Buffer2<u32>) -> Self {
        Self { bits }
    }

    #[inline]
    pub fn bits(&self) -> &Buffer2<u32> {
        &self.bits
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.bits.shape()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.bits[(x, y)]
    }

    #[inline]
    pub fn has(&self, x: usize, y: usize, flags: MaskFlags) -> bool {
        flags.matches(self.bits[(x, y)])
    }

    pub fn set(&mut self, x: usize, y: usize, plane: MaskPlane) {
        self.bits[(x, y)] |= plane.bit();
    }

    /// Set `plane` wherever `pixels` is true.
    pub fn set_plane_where(&mut self, pixels: &Buffer2<bool>, plane: MaskPlane) -> Result<()> {
        if !self.bits.same_shape(pixels) {
            return Err(Error::shape("plane pixels", self.shape(), pixels.shape()));
        }
        for (value, &on) in self.bits.iter_mut().zip(pixels.iter()) {
            if on {
                *value |= plane.bit();
            }
        }
        Ok(())
    }

    /// Mark every footprint pixel of `segmap` with `plane`, optionally grown
    /// by a disk of `grow` pixels first.
    pub fn set_plane_from_segmentation(
        &mut self,
        segmap: &SegmentationMap,
        plane: MaskPlane,
        grow: usize,
    ) -> Result<()> {
        let footprints = dilate_disk(&segmap.nonzero(), grow);
        self.set_plane_where(&footprints, plane)
    }

    pub fn clear_plane(&mut self, plane: MaskPlane) {
        let keep = !plane.bit();
        for value in self.bits.iter_mut() {
            *value &= keep;
        }
    }

    /// Boolean map of pixels carrying any of `flags`.
    pub fn select(&self, flags: MaskFlags) -> Buffer2<bool> {
        self.bits.map(|&v| flags.matches(v))
    }

    pub fn count(&self, flags: MaskFlags) -> usize {
        self.bits.iter().filter(|&&v| flags.matches(v)).count()
    }

    /// Pixels with any bit set after removing the `exclude` planes.
    pub fn bad_pixel_mask(&self, exclude: MaskFlags) -> Buffer2<bool> {
        self.bits.map(|&v| v & !exclude.bits() != 0)
    }

    pub fn union(&mut self, other: &Mask) -> Result<()> {
        if !self.bits.same_shape(&other.bits) {
            return Err(Error::shape("mask", self.shape(), other.shape()));
        }
        for (a, &b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
        Ok(())
    }
}
