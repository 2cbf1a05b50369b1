// Signed distance field conversion for padded glyph bitmaps.
//
// Chamfer distance transform (two passes, 8-neighbourhood) run once for the
// inside and once for the outside of the glyph. 128 encodes the outline,
// larger values are inside.

const DIAGONAL: f32 = std::f32::consts::SQRT_2;

/// Rewrite an 8-bit coverage bitmap in place as a distance field that
/// saturates `radius` pixels away from the outline.
pub fn coverage_to_sdf(data: &mut [u8], width: usize, height: usize, radius: f32) {
    debug_assert_eq!(data.len(), width * height, "bitmap size mismatch");
    if width == 0 || height == 0 || radius <= 0.0 {
        return;
    }

    let inside: Vec<bool> = data.iter().map(|&v| v >= 128).collect();
    let to_outside = distance_to(&inside, width, height, false);
    let to_inside = distance_to(&inside, width, height, true);

    let scale = 127.0 / radius;
    for (i, value) in data.iter_mut().enumerate() {
        let signed = if inside[i] {
            to_outside[i] - 0.5
        } else {
            0.5 - to_inside[i]
        };
        *value = (128.0 + signed * scale).round().clamp(0.0, 255.0) as u8;
    }
}

/// Approximate distance from every pixel to the nearest pixel whose
/// `inside` flag equals `target`.
fn distance_to(inside: &[bool], width: usize, height: usize, target: bool) -> Vec<f32> {
    let far = (width + height) as f32;
    let mut dist: Vec<f32> = inside
        .iter()
        .map(|&v| if v == target { 0.0 } else { far })
        .collect();

    let relax = |dist: &mut [f32], x: usize, y: usize, dx: isize, dy: isize, cost: f32| {
        let nx = x as isize + dx;
        let ny = y as isize + dy;
        if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
            return;
        }
        let candidate = dist[ny as usize * width + nx as usize] + cost;
        let here = &mut dist[y * width + x];
        if candidate < *here {
            *here = candidate;
        }
    };

    for y in 0..height {
        for x in 0..width {
            relax(&mut dist, x, y, -1, 0, 1.0);
            relax(&mut dist, x, y, 0, -1, 1.0);
            relax(&mut dist, x, y, -1, -1, DIAGONAL);
            relax(&mut dist, x, y, 1, -1, DIAGONAL);
        }
    }
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            relax(&mut dist, x, y, 1, 0, 1.0);
            relax(&mut dist, x, y, 0, 1, 1.0);
            relax(&mut dist, x, y, 1, 1, DIAGONAL);
            relax(&mut dist, x, y, -1, 1, DIAGONAL);
        }
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inside_is_brighter_than_outside() {
        // 7x7 with a 3x3 solid block in the middle.
        let mut data = vec![0u8; 49];
        for y in 2..5 {
            for x in 2..5 {
                data[y * 7 + x] = 255;
            }
        }
        coverage_to_sdf(&mut data, 7, 7, 3.0);

        let center = data[3 * 7 + 3];
        let edge = data[2 * 7 + 3];
        let corner = data[0];
        assert!(center > edge, "center {center} edge {edge}");
        assert!(edge >= 128);
        assert!(corner < 128);
        assert!(data[7 + 3] > corner, "distance falls off away from the glyph");
    }

    #[test]
    fn test_empty_bitmap_saturates_outside() {
        let mut data = vec![0u8; 16];
        coverage_to_sdf(&mut data, 4, 4, 2.0);
        assert!(data.iter().all(|&v| v == 0));
    }
}
