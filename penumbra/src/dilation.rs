//! Morphological dilation of boolean pixel masks.

use common::Buffer2;

/// Dilate `mask` with an `size × size` square structuring element.
///
/// The element covers offsets `-(size/2) ..= (size-1)/2` along each axis, so
/// even sizes extend one pixel further towards negative coordinates. Sizes 0
/// and 1 return a copy. Implemented as two separable 1D passes.
pub fn dilate_square(mask: &Buffer2<bool>, size: usize) -> Buffer2<bool> {
    if size <= 1 {
        return mask.clone();
    }

    let before = (size / 2) as isize;
    let after = ((size - 1) / 2) as isize;
    let (width, height) = mask.shape();

    // A source pixel at s marks destinations s - before ..= s + after.
    let mut horizontal = Buffer2::new_filled(width, height, false);
    for y in 0..height {
        let row = mask.row(y);
        for (x, _) in row.iter().enumerate().filter(|(_, &set)| set) {
            let lo = (x as isize - before).max(0) as usize;
            let hi = ((x as isize + after) as usize).min(width - 1);
            for dst in lo..=hi {
                horizontal[(dst, y)] = true;
            }
        }
    }

    let mut output = Buffer2::new_filled(width, height, false);
    for y in 0..height {
        for x in 0..width {
            if !horizontal[(x, y)] {
                continue;
            }
            let lo = (y as isize - before).max(0) as usize;
            let hi = ((y as isize + after) as usize).min(height - 1);
            for dst in lo..=hi {
                output[(x, dst)] = true;
            }
        }
    }
    output
}

/// Dilate `mask` with a disk of the given radius (inclusive, `dx² + dy² <= r²`).
pub fn dilate_disk(mask: &Buffer2<bool>, radius: usize) -> Buffer2<bool> {
    if radius == 0 {
        return mask.clone();
    }

    let offsets = disk_offsets(radius as f64);
    let (width, height) = mask.shape();
    let mut output = Buffer2::new_filled(width, height, false);

    for (idx, _) in mask.iter().enumerate().filter(|(_, &set)| set) {
        let (x, y) = mask.coords(idx);
        for &(dx, dy) in &offsets {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                output[(nx as usize, ny as usize)] = true;
            }
        }
    }
    output
}

/// Integer offsets inside a disk of radius `radius`, boundary included.
pub fn disk_offsets(radius: f64) -> Vec<(i64, i64)> {
    let r = radius.max(0.0);
    let reach = r.floor() as i64;
    let r2 = r * r;
    let mut offsets = Vec::new();
    for dy in -reach..=reach {
        for dx in -reach..=reach {
            if (dx * dx + dy * dy) as f64 <= r2 {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}
