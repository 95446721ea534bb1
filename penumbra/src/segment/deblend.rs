//! Multi-threshold deblending of one connected footprint.
//!
//! SExtractor-style: the footprint is re-thresholded at `n_thresholds` levels
//! between its faintest and brightest pixel. Each time a branch breaks into
//! several connected pieces the pieces become child nodes. A split is kept
//! only when at least two children carry `min_contrast` of the whole
//! footprint's flux. Surviving branches become objects and every footprint
//! pixel goes to the nearest object peak.
//!
//! Reference: Bertin & Arnouts (1996), A&AS 117, 393

use common::Buffer2;
use smallvec::SmallVec;

use super::{Connectivity, DeblendConfig};
use crate::image::BoundingBox;

/// Upper bound on nodes per footprint tree.
const MAX_NODES: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// Pixels of one connected footprint, as flat indices into the image.
#[derive(Debug, Clone)]
pub(super) struct Component {
    pub pixels: Vec<usize>,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone)]
struct Node {
    /// Indices into `Component::pixels`.
    members: Vec<u32>,
    flux: f64,
    /// Index into `Component::pixels` of the brightest member.
    peak: u32,
    children: SmallVec<[usize; 4]>,
}

/// Bbox-local scratch raster used for flood fills.
struct LocalGrid {
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
    /// Component pixel index + 1 for pixels in the current candidate set, else 0.
    cell: Vec<u32>,
    visited: Vec<bool>,
}

impl LocalGrid {
    fn new(bbox: &BoundingBox) -> Self {
        let width = bbox.width();
        let height = bbox.height();
        Self {
            x0: bbox.x_min,
            y0: bbox.y_min,
            width,
            height,
            cell: vec![0; width * height],
            visited: vec![false; width * height],
        }
    }

    #[inline]
    fn local(&self, image_width: usize, idx: usize) -> usize {
        let (x, y) = (idx % image_width, idx / image_width);
        (y - self.y0) * self.width + (x - self.x0)
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Split `component` into objects. Returns one pixel list per object, or a
/// single list holding every pixel when no split survives.
pub(super) fn deblend(
    component: &Component,
    values: &Buffer2<f32>,
    config: &DeblendConfig,
    min_area: usize,
    connectivity: Connectivity,
) -> Vec<Vec<usize>> {
    let single = || vec![component.pixels.clone()];
    if !config.is_enabled() || component.pixels.len() < 2 * min_area.max(1) {
        return single();
    }

    let pixel_values: Vec<f32> = component.pixels.iter().map(|&i| values[i]).collect();
    let (low, high) = pixel_values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if high <= low {
        return single();
    }

    let mut grid = LocalGrid::new(&component.bbox);
    let tree = build_tree(component, &pixel_values, values.width(), &mut grid, low, high, config, connectivity);

    let root_flux = tree[0].flux;
    let objects = significant_branches(&tree, 0, config.min_contrast as f64 * root_flux);
    if objects.len() <= 1 {
        return single();
    }

    let peaks: Vec<usize> = objects.iter().map(|&n| component.pixels[tree[n].peak as usize]).collect();
    let assignment = assign_nearest(component, &peaks, values.width(), None);

    // Objects below min_area are folded into the nearest surviving object.
    let mut areas = vec![0usize; peaks.len()];
    for &a in &assignment {
        areas[a] += 1;
    }
    let kept: Vec<bool> = areas.iter().map(|&a| a >= min_area).collect();
    if kept.iter().filter(|&&k| k).count() <= 1 {
        return single();
    }
    let assignment = assign_nearest(component, &peaks, values.width(), Some(&kept));

    let mut objects: Vec<Vec<usize>> = vec![Vec::new(); peaks.len()];
    for (&pixel, &owner) in component.pixels.iter().zip(&assignment) {
        objects[owner].push(pixel);
    }
    objects.retain(|o| !o.is_empty());
    objects
}

// ============================================================================
// Tree building
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn build_tree(
    component: &Component,
    pixel_values: &[f32],
    image_width: usize,
    grid: &mut LocalGrid,
    low: f32,
    high: f32,
    config: &DeblendConfig,
    connectivity: Connectivity,
) -> Vec<Node> {
    let all: Vec<u32> = (0..component.pixels.len() as u32).collect();
    let mut tree = vec![make_node(all, pixel_values)];
    let mut active = vec![0usize];

    for level in 1..config.n_thresholds {
        let threshold = threshold_level(low, high, level, config.n_thresholds);
        let mut next_active = Vec::with_capacity(active.len());

        for &node_idx in &active {
            let above: Vec<u32> = tree[node_idx]
                .members
                .iter()
                .copied()
                .filter(|&m| pixel_values[m as usize] > threshold)
                .collect();
            if above.is_empty() {
                continue;
            }

            let regions = connected_regions(&above, component, image_width, grid, connectivity);
            if regions.len() < 2 || tree.len() + regions.len() > MAX_NODES {
                tree[node_idx].members = above;
                next_active.push(node_idx);
                continue;
            }

            for region in regions {
                let child = tree.len();
                tree.push(make_node(region, pixel_values));
                tree[node_idx].children.push(child);
                next_active.push(child);
            }
        }

        if next_active.is_empty() {
            break;
        }
        active = next_active;
    }

    tree
}

/// Threshold `level` of `n` between `low` and `high`: exponentially spaced
/// when `low > 0`, linearly otherwise.
fn threshold_level(low: f32, high: f32, level: usize, n: usize) -> f32 {
    let t = level as f32 / n as f32;
    if low > 0.0 {
        low * (high / low).powf(t)
    } else {
        low + (high - low) * t
    }
}

fn make_node(members: Vec<u32>, pixel_values: &[f32]) -> Node {
    let flux = members.iter().map(|&m| pixel_values[m as usize] as f64).sum();
    let peak = members
        .iter()
        .copied()
        .max_by(|&a, &b| {
            pixel_values[a as usize]
                .total_cmp(&pixel_values[b as usize])
                .then(b.cmp(&a))
        })
        .unwrap_or(0);
    Node {
        members,
        flux,
        peak,
        children: SmallVec::new(),
    }
}

fn connected_regions(
    members: &[u32],
    component: &Component,
    image_width: usize,
    grid: &mut LocalGrid,
    connectivity: Connectivity,
) -> Vec<Vec<u32>> {
    for &m in members {
        let l = grid.local(image_width, component.pixels[m as usize]);
        grid.cell[l] = m + 1;
        grid.visited[l] = false;
    }

    let neighbours: &[(i64, i64)] = match connectivity {
        Connectivity::Four => &[(1, 0), (-1, 0), (0, 1), (0, -1)],
        Connectivity::Eight => &[
            (1, 0),
            (-1, 0),
            (0, 1),
            (0, -1),
            (1, 1),
            (1, -1),
            (-1, 1),
            (-1, -1),
        ],
    };

    let mut regions = Vec::new();
    let mut stack = Vec::new();
    for &seed in members {
        let start = grid.local(image_width, component.pixels[seed as usize]);
        if grid.visited[start] {
            continue;
        }
        grid.visited[start] = true;
        stack.push(start);
        let mut region = Vec::new();

        while let Some(l) = stack.pop() {
            region.push(grid.cell[l] - 1);
            let lx = (l % grid.width) as i64;
            let ly = (l / grid.width) as i64;
            for &(dx, dy) in neighbours {
                let nx = lx + dx;
                let ny = ly + dy;
                if nx < 0 || ny < 0 || nx >= grid.width as i64 || ny >= grid.height as i64 {
                    continue;
                }
                let n = ny as usize * grid.width + nx as usize;
                if grid.cell[n] != 0 && !grid.visited[n] {
                    grid.visited[n] = true;
                    stack.push(n);
                }
            }
        }
        region.sort_unstable();
        regions.push(region);
    }

    for &m in members {
        let l = grid.local(image_width, component.pixels[m as usize]);
        grid.cell[l] = 0;
        grid.visited[l] = false;
    }
    regions
}

// ============================================================================
// Tree analysis
// ============================================================================

/// Nodes treated as separate objects below `node`.
///
/// A node with two or more children above `min_flux` splits into them. A
/// single significant child is descended into in case it splits further.
fn significant_branches(tree: &[Node], node: usize, min_flux: f64) -> SmallVec<[usize; 8]> {
    let significant: SmallVec<[usize; 4]> = tree[node]
        .children
        .iter()
        .copied()
        .filter(|&c| tree[c].flux >= min_flux)
        .collect();

    match significant.len() {
        0 => smallvec::smallvec![node],
        1 => {
            let below = significant_branches(tree, significant[0], min_flux);
            if below.len() >= 2 {
                below
            } else {
                smallvec::smallvec![node]
            }
        }
        _ => significant
            .iter()
            .flat_map(|&c| significant_branches(tree, c, min_flux))
            .collect(),
    }
}

/// Index of the nearest peak for every component pixel; ties go to the
/// earlier peak. With `allowed`, only peaks marked true are candidates.
fn assign_nearest(
    component: &Component,
    peaks: &[usize],
    image_width: usize,
    allowed: Option<&[bool]>,
) -> Vec<usize> {
    let peak_xy: Vec<(i64, i64)> = peaks
        .iter()
        .map(|&p| ((p % image_width) as i64, (p / image_width) as i64))
        .collect();

    component
        .pixels
        .iter()
        .map(|&idx| {
            let x = (idx % image_width) as i64;
            let y = (idx / image_width) as i64;
            let mut best = 0;
            let mut best_d = i64::MAX;
            for (i, &(px, py)) in peak_xy.iter().enumerate() {
                if allowed.is_some_and(|a| !a[i]) {
                    continue;
                }
                let d = (x - px).pow(2) + (y - py).pow(2);
                if d < best_d {
                    best_d = d;
                    best = i;
                }
            }
            best
        })
        .collect()
}
