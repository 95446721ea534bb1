//! Connected component labeling on run-length encoded rows with union-find.

use common::Buffer2;

use super::Connectivity;

/// A horizontal run of foreground pixels.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: usize, // inclusive
    end: usize,   // exclusive
    label: u32,
}

/// Check if two runs from adjacent rows are connected.
#[inline]
fn runs_connected(prev: &Run, curr: &Run, connectivity: Connectivity) -> bool {
    match connectivity {
        Connectivity::Four => prev.start < curr.end && prev.end > curr.start,
        Connectivity::Eight => prev.start < curr.end + 1 && prev.end + 1 > curr.start,
    }
}

fn extract_runs(row: &[bool], runs: &mut Vec<Run>) {
    runs.clear();
    let mut x = 0;
    while x < row.len() {
        if !row[x] {
            x += 1;
            continue;
        }
        let start = x;
        while x < row.len() && row[x] {
            x += 1;
        }
        runs.push(Run {
            start,
            end: x,
            label: 0,
        });
    }
}

struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new() -> Self {
        // Slot 0 is background.
        Self { parent: vec![0] }
    }

    fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32;
        self.parent.push(label);
        label
    }

    fn find(&mut self, mut label: u32) -> u32 {
        let mut root = label;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        while self.parent[label as usize] != root {
            let next = self.parent[label as usize];
            self.parent[label as usize] = root;
            label = next;
        }
        root
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Keep the smaller root so final labels follow raster order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi as usize] = lo;
        }
    }
}

/// Label the connected foreground regions of `mask`.
///
/// Returns the label map (0 = background, `1..=n` numbered by first pixel in
/// raster order) and `n`.
pub(crate) fn label_components(
    mask: &Buffer2<bool>,
    connectivity: Connectivity,
) -> (Buffer2<u32>, usize) {
    let (width, height) = mask.shape();
    let mut uf = UnionFind::new();
    let mut all_runs: Vec<Vec<Run>> = Vec::with_capacity(height);
    let mut prev: Vec<Run> = Vec::new();
    let mut curr: Vec<Run> = Vec::new();

    for y in 0..height {
        extract_runs(mask.row(y), &mut curr);

        let mut search_from = 0;
        for run in curr.iter_mut() {
            while search_from < prev.len() && prev[search_from].end + 1 < run.start {
                search_from += 1;
            }
            for p in prev[search_from..].iter() {
                if p.start > run.end {
                    break;
                }
                if runs_connected(p, run, connectivity) {
                    if run.label == 0 {
                        run.label = p.label;
                    } else {
                        uf.union(run.label, p.label);
                    }
                }
            }
            if run.label == 0 {
                run.label = uf.make_set();
            }
        }

        all_runs.push(curr.clone());
        std::mem::swap(&mut prev, &mut curr);
    }

    // Resolve provisional labels to contiguous final labels.
    let mut final_label = vec![0u32; uf.parent.len()];
    let mut count = 0u32;
    for provisional in 1..uf.parent.len() as u32 {
        let root = uf.find(provisional);
        if final_label[root as usize] == 0 {
            count += 1;
            final_label[root as usize] = count;
        }
        final_label[provisional as usize] = final_label[root as usize];
    }

    let mut labels = Buffer2::new_default(width, height);
    for (y, runs) in all_runs.iter().enumerate() {
        for run in runs {
            let label = final_label[run.label as usize];
            for x in run.start..run.end {
                labels[(x, y)] = label;
            }
        }
    }

    (labels, count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&str]) -> Buffer2<bool> {
        let height = rows.len();
        let width = rows[0].len();
        Buffer2::from_fn(width, height, |x, y| rows[y].as_bytes()[x] == b'#')
    }

    #[test]
    fn test_empty_mask() {
        let mask = Buffer2::new_filled(8, 4, false);
        let (labels, n) = label_components(&mask, Connectivity::Eight);
        assert_eq!(n, 0);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_diagonal_depends_on_connectivity() {
        let mask = mask_from_rows(&["#..", ".#.", "..#"]);
        assert_eq!(label_components(&mask, Connectivity::Four).1, 3);
        assert_eq!(label_components(&mask, Connectivity::Eight).1, 1);
    }

    #[test]
    fn test_u_shape_merges_into_one() {
        let mask = mask_from_rows(&["#...#", "#...#", "#####"]);
        let (labels, n) = label_components(&mask, Connectivity::Four);
        assert_eq!(n, 1);
        assert_eq!(labels[(0, 0)], labels[(4, 0)]);
    }

    #[test]
    fn test_labels_follow_raster_order() {
        let mask = mask_from_rows(&["..#.", "....", "#..#"]);
        let (labels, n) = label_components(&mask, Connectivity::Eight);
        assert_eq!(n, 3);
        assert_eq!(labels[(2, 0)], 1);
        assert_eq!(labels[(0, 2)], 2);
        assert_eq!(labels[(3, 2)], 3);
    }

    #[test]
    fn test_late_merge_keeps_contiguous_labels() {
        // Two arms get separate provisional labels and merge on the last row;
        // the component to the right must become label 2.
        let mask = mask_from_rows(&["#.#.#", "#.#.#", "###.."]);
        let (labels, n) = label_components(&mask, Connectivity::Four);
        assert_eq!(n, 2);
        assert_eq!(labels[(2, 0)], 1);
        assert_eq!(labels[(4, 0)], 2);
    }
}
