//! Per texel bodies of the frame post processing passes. Every function takes
//! the flattened texel index it is invoked for, the way a compute thread sees
//! its global id, and reads only its inputs.

use bevy::math::IVec2;
use image::Rgba32FImage;

/// Dilation stops looking for a covered neighbour past this many texels.
pub const MAX_DILATE_DISTANCE: u32 = 32;

pub fn is_covered(alpha: f32) -> bool {
    alpha > 0.0
}

/// `step` of the coverage alpha, broadcast to every channel.
pub fn solidify(texel: [f32; 4]) -> [f32; 4] {
    let a = if is_covered(texel[3]) { 1.0 } else { 0.0 };
    [a; 4]
}

pub fn combine(color: [f32; 4], coverage: [f32; 4]) -> [f32; 4] {
    [color[0], color[1], color[2], coverage[3]]
}

fn texel_coord(index: usize, width: u32) -> IVec2 {
    IVec2::new((index % width as usize) as i32, (index / width as usize) as i32)
}

fn in_bounds(image: &Rgba32FImage, p: IVec2) -> bool {
    p.x >= 0 && p.y >= 0 && (p.x as u32) < image.width() && (p.y as u32) < image.height()
}

fn texel(image: &Rgba32FImage, p: IVec2) -> [f32; 4] {
    image.get_pixel(p.x as u32, p.y as u32).0
}

fn covered_at(mask: &Rgba32FImage, p: IVec2) -> bool {
    in_bounds(mask, p) && is_covered(texel(mask, p)[3])
}

/// Offsets at chebyshev distance `r`.
fn ring(r: i32) -> impl Iterator<Item = IVec2> {
    (-r..=r)
        .flat_map(move |d| [IVec2::new(d, -r), IVec2::new(d, r)])
        .chain((-r + 1..r).flat_map(move |d| [IVec2::new(-r, d), IVec2::new(r, d)]))
}

/// Closest texel (euclidean) around `origin` satisfying `hit`, searched ring by
/// ring out to `max_radius`. Returns the texel and its squared distance.
fn nearest(origin: IVec2, max_radius: u32, hit: impl Fn(IVec2) -> bool) -> Option<(IVec2, i32)> {
    let mut best: Option<(IVec2, i32)> = None;
    for r in 1..=max_radius as i32 {
        if best.is_some_and(|(_, d2)| r * r > d2) {
            break;
        }
        for offset in ring(r) {
            let d2 = offset.length_squared();
            if best.map_or(true, |(_, b)| d2 < b) && hit(origin + offset) {
                best = Some((origin + offset, d2));
            }
        }
    }
    best
}

/// Texels outside the mask take the value of the nearest covered texel.
/// Unless `all_channels` is set the texel keeps its own alpha so the mask
/// survives the pass.
pub fn dilate(
    index: usize,
    source: &Rgba32FImage,
    mask: &Rgba32FImage,
    all_channels: bool,
) -> [f32; 4] {
    let p = texel_coord(index, source.width());
    let own = texel(source, p);
    if covered_at(mask, p) {
        return own;
    }

    match nearest(p, MAX_DILATE_DISTANCE, |q| covered_at(mask, q)) {
        Some((q, _)) => {
            let n = texel(source, q);
            if all_channels {
                n
            } else {
                [n[0], n[1], n[2], own[3]]
            }
        }
        None => own,
    }
}

/// Distance from a covered texel to the closest uncovered one. Texels past the
/// edge of the frame count as uncovered; uncovered texels are at distance 0.
pub fn min_distance(index: usize, mask: &Rgba32FImage) -> f32 {
    let p = texel_coord(index, mask.width());
    if !covered_at(mask, p) {
        return 0.0;
    }

    let border = (p.x + 1)
        .min(p.y + 1)
        .min(mask.width() as i32 - p.x)
        .min(mask.height() as i32 - p.y);
    let search = (border - 1).max(0) as u32;
    match nearest(p, search, |q| in_bounds(mask, q) && !covered_at(mask, q)) {
        Some((_, d2)) => (d2 as f32).sqrt().min(border as f32),
        None => border as f32,
    }
}

/// Largest of the first `len` min distances.
pub fn max_distance(min_distances: &[f32], len: usize) -> f32 {
    min_distances
        .iter()
        .take(len)
        .copied()
        .fold(0.0, f32::max)
}

/// Source color with alpha replaced by the normalized distance to the edge.
pub fn distance_alpha(
    index: usize,
    source: &Rgba32FImage,
    min_distances: &[f32],
    max_distance: f32,
) -> [f32; 4] {
    let p = texel_coord(index, source.width());
    let c = texel(source, p);
    let alpha = if max_distance > 0.0 {
        min_distances.get(index).copied().unwrap_or(0.0) / max_distance
    } else {
        0.0
    };
    [c[0], c[1], c[2], alpha]
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    /// `size²` frame with a filled square of color `color` covering `[lo, hi)`.
    fn square_frame(size: u32, lo: u32, hi: u32, color: [f32; 3]) -> Rgba32FImage {
        Rgba32FImage::from_fn(size, size, |x, y| {
            if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                Rgba([color[0], color[1], color[2], 1.0])
            } else {
                Rgba([0.0; 4])
            }
        })
    }

    fn index(x: u32, y: u32, width: u32) -> usize {
        (y * width + x) as usize
    }

    #[test]
    fn ring_sizes() {
        assert_eq!(ring(1).count(), 8);
        assert_eq!(ring(3).count(), 24);
        assert!(ring(2).all(|o| o.x.abs().max(o.y.abs()) == 2));
    }

    #[test]
    fn solidify_is_a_step() {
        assert_eq!(solidify([0.3, 0.2, 0.1, 0.01]), [1.0; 4]);
        assert_eq!(solidify([0.3, 0.2, 0.1, 0.0]), [0.0; 4]);
        assert_eq!(combine([0.5, 0.4, 0.3, 0.0], [1.0; 4]), [0.5, 0.4, 0.3, 1.0]);
    }

    #[test]
    fn dilation_pads_uncovered_texels() {
        let frame = square_frame(16, 6, 10, [1.0, 0.5, 0.25]);

        // covered texels are untouched
        assert_eq!(dilate(index(7, 7, 16), &frame, &frame, false), [1.0, 0.5, 0.25, 1.0]);

        // neighbours pick up the color but keep zero alpha
        let padded = dilate(index(5, 7, 16), &frame, &frame, false);
        assert_eq!(padded, [1.0, 0.5, 0.25, 0.0]);

        let all = dilate(index(0, 0, 16), &frame, &frame, true);
        assert_eq!(all, [1.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn dilation_uses_separate_mask() {
        let mask = square_frame(8, 2, 4, [1.0; 3]);
        let normals = Rgba32FImage::from_fn(8, 8, |x, _| {
            if x < 3 {
                Rgba([0.2, 0.2, 0.2, 0.5])
            } else {
                Rgba([0.9, 0.9, 0.9, 0.7])
            }
        });
        // (0, 2) is outside the mask, nearest covered texel is (2, 2)
        assert_eq!(dilate(index(0, 2, 8), &normals, &mask, true), [0.2, 0.2, 0.2, 0.5]);
        // (6, 3) pads from (3, 3)
        assert_eq!(dilate(index(6, 3, 8), &normals, &mask, true), [0.9, 0.9, 0.9, 0.7]);
    }

    #[test]
    fn dilation_without_coverage_is_identity() {
        let empty = Rgba32FImage::from_pixel(8, 8, Rgba([0.0, 0.0, 0.0, 0.5]));
        let mask = Rgba32FImage::new(8, 8);
        assert_eq!(dilate(5, &empty, &mask, true), [0.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn distances_grow_toward_the_middle() {
        let frame = square_frame(16, 4, 12, [1.0; 3]);
        assert_eq!(min_distance(index(0, 0, 16), &frame), 0.0);
        assert_eq!(min_distance(index(4, 8, 16), &frame), 1.0);
        assert_eq!(min_distance(index(5, 8, 16), &frame), 2.0);
        assert_eq!(min_distance(index(7, 7, 16), &frame), 4.0);
        assert_eq!(min_distance(index(8, 8, 16), &frame), 4.0);
    }

    #[test]
    fn frame_edge_counts_as_uncovered() {
        let full = Rgba32FImage::from_pixel(9, 9, Rgba([1.0; 4]));
        assert_eq!(min_distance(index(0, 0, 9), &full), 1.0);
        assert_eq!(min_distance(index(4, 4, 9), &full), 5.0);
        assert_eq!(min_distance(index(2, 4, 9), &full), 3.0);
    }

    #[test]
    fn diagonal_distance_is_euclidean() {
        // single uncovered texel in a covered field
        let mut frame = Rgba32FImage::from_pixel(32, 32, Rgba([1.0; 4]));
        frame.put_pixel(10, 10, Rgba([0.0; 4]));
        let d = min_distance(index(13, 14, 32), &frame);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn alpha_is_normalized_distance() {
        let frame = square_frame(16, 4, 12, [0.5; 3]);
        let distances: Vec<f32> = (0..256).map(|i| min_distance(i, &frame)).collect();
        let max = max_distance(&distances, distances.len());
        assert_eq!(max, 4.0);

        let alphas: Vec<f32> = (0..256)
            .map(|i| distance_alpha(i, &frame, &distances, max)[3])
            .collect();
        assert!(alphas.iter().all(|a| (0.0..=1.0).contains(a)));
        assert_eq!(alphas[index(0, 0, 16)], 0.0);
        assert_eq!(alphas[index(4, 8, 16)], 0.25);
        assert_eq!(alphas[index(7, 7, 16)], 1.0);
        // interior texels never end up transparent
        for y in 4..12 {
            for x in 4..12 {
                assert!(alphas[index(x, y, 16)] > 0.0);
            }
        }
        assert_eq!(
            distance_alpha(index(5, 5, 16), &frame, &distances, max)[..3],
            [0.5; 3]
        );
    }

    #[test]
    fn empty_frame_stays_transparent() {
        let frame = Rgba32FImage::new(8, 8);
        let distances: Vec<f32> = (0..64).map(|i| min_distance(i, &frame)).collect();
        let max = max_distance(&distances, 64);
        assert_eq!(max, 0.0);
        assert_eq!(distance_alpha(10, &frame, &distances, max)[3], 0.0);
    }
}
