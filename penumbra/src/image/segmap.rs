use common::Buffer2;
use glam::DVec2;
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Maximum number of peaks recorded per footprint.
pub const MAX_PEAKS: usize = 16;

/// Inclusive pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl BoundingBox {
    fn at(x: usize, y: usize) -> Self {
        Self {
            x_min: x,
            x_max: x,
            y_min: y,
            y_max: y,
        }
    }

    fn include(&mut self, x: usize, y: usize) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    pub fn width(&self) -> usize {
        self.x_max - self.x_min + 1
    }

    pub fn height(&self) -> usize {
        self.y_max - self.y_min + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub x: usize,
    pub y: usize,
    pub value: f32,
}

/// Summary of one labeled footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct FootprintInfo {
    pub label: u32,
    pub bbox: BoundingBox,
    pub area: usize,
    /// Local maxima sorted brightest first; never empty.
    pub peaks: SmallVec<[Peak; 4]>,
}

impl FootprintInfo {
    /// Arithmetic mean of all peak coordinates.
    pub fn mean_peak(&self) -> DVec2 {
        let n = self.peaks.len().max(1) as f64;
        let sum = self
            .peaks
            .iter()
            .fold(DVec2::ZERO, |acc, p| acc + DVec2::new(p.x as f64, p.y as f64));
        sum / n
    }

    pub fn brightest(&self) -> Peak {
        self.peaks[0]
    }
}

/// Integer label raster: 0 is background, labels `1..=n` are footprints and
/// label `L` describes catalog row `L - 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMap {
    labels: Buffer2<u32>,
    footprints: Vec<FootprintInfo>,
}

impl SegmentationMap {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            labels: Buffer2::new_default(width, height),
            footprints: Vec::new(),
        }
    }

    /// Build from a raw label raster, measuring bounding boxes and peaks on `values`.
    ///
    /// Fails with `InvalidParameter` if labels are not exactly `1..=n`.
    pub fn from_labels(labels: Buffer2<u32>, values: &Buffer2<f32>) -> Result<Self> {
        if !labels.same_shape(values) {
            return Err(Error::shape("label values", labels.shape(), values.shape()));
        }

        let n = labels.iter().copied().max().unwrap_or(0) as usize;
        let mut boxes: Vec<Option<BoundingBox>> = vec![None; n];
        let mut areas = vec![0usize; n];
        let mut brightest: Vec<Option<Peak>> = vec![None; n];
        let mut maxima: Vec<Vec<Peak>> = vec![Vec::new(); n];

        let (width, height) = labels.shape();
        for y in 0..height {
            for x in 0..width {
                let label = labels[(x, y)];
                if label == 0 {
                    continue;
                }
                let i = label as usize - 1;
                areas[i] += 1;
                match boxes[i].as_mut() {
                    Some(bbox) => bbox.include(x, y),
                    None => boxes[i] = Some(BoundingBox::at(x, y)),
                }

                let value = values[(x, y)];
                let peak = Peak { x, y, value };
                if brightest[i].is_none_or(|b| value > b.value) {
                    brightest[i] = Some(peak);
                }
                if is_local_maximum(&labels, values, x, y, label) {
                    maxima[i].push(peak);
                }
            }
        }

        let mut footprints = Vec::with_capacity(n);
        for (i, ((bbox, area), (top, mut peaks))) in boxes
            .into_iter()
            .zip(areas)
            .zip(brightest.into_iter().zip(maxima))
            .enumerate()
        {
            let (Some(bbox), Some(top)) = (bbox, top) else {
                return Err(Error::invalid(
                    "labels",
                    format!("label {} is missing; labels must be contiguous", i + 1),
                ));
            };

            peaks.sort_by(|a, b| b.value.total_cmp(&a.value));
            if !peaks.iter().any(|p| p.x == top.x && p.y == top.y) {
                peaks.insert(0, top);
            }
            peaks.truncate(MAX_PEAKS);

            footprints.push(FootprintInfo {
                label: i as u32 + 1,
                bbox,
                area,
                peaks: peaks.into_iter().collect(),
            });
        }

        Ok(Self { labels, footprints })
    }

    #[inline]
    pub fn labels(&self) -> &Buffer2<u32> {
        &self.labels
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.labels.shape()
    }

    #[inline]
    pub fn label_at(&self, x: usize, y: usize) -> u32 {
        self.labels[(x, y)]
    }

    /// Number of footprints.
    #[inline]
    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    #[inline]
    pub fn footprints(&self) -> &[FootprintInfo] {
        &self.footprints
    }

    pub fn info(&self, label: u32) -> Option<&FootprintInfo> {
        let idx = (label as usize).checked_sub(1)?;
        self.footprints.get(idx)
    }

    /// Pixel coordinates of the footprint with `label`, in raster order.
    pub fn footprint(&self, label: u32) -> impl Iterator<Item = (usize, usize)> + '_ {
        let bbox = self.info(label).map(|info| info.bbox);
        bbox.into_iter().flat_map(move |b| {
            (b.y_min..=b.y_max).flat_map(move |y| {
                (b.x_min..=b.x_max).filter_map(move |x| {
                    (self.labels[(x, y)] == label).then_some((x, y))
                })
            })
        })
    }

    pub fn nonzero(&self) -> Buffer2<bool> {
        self.labels.map(|&l| l != 0)
    }

    /// Keep footprints whose `keep[label - 1]` is true and renumber the
    /// survivors `1..=m` in their original order.
    pub fn retain_labels(&self, keep: &[bool]) -> Result<SegmentationMap> {
        if keep.len() != self.footprints.len() {
            return Err(Error::invalid(
                "keep",
                format!(
                    "expected {} entries, got {}",
                    self.footprints.len(),
                    keep.len()
                ),
            ));
        }

        let mut remap = vec![0u32; self.footprints.len() + 1];
        let mut footprints = Vec::new();
        for (info, _) in self.footprints.iter().zip(keep).filter(|(_, &k)| k) {
            let new_label = footprints.len() as u32 + 1;
            remap[info.label as usize] = new_label;
            footprints.push(FootprintInfo {
                label: new_label,
                ..info.clone()
            });
        }

        Ok(SegmentationMap {
            labels: self.labels.map(|&l| remap[l as usize]),
            footprints,
        })
    }
}

/// Strictly greater than every 8-neighbour carrying the same label.
fn is_local_maximum(
    labels: &Buffer2<u32>,
    values: &Buffer2<f32>,
    x: usize,
    y: usize,
    label: u32,
) -> bool {
    let v = values[(x, y)];
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if labels.get_checked(nx, ny) != Some(&label) {
                continue;
            }
            if values[(nx as usize, ny as usize)] >= v {
                return false;
            }
        }
    }
    true
}
