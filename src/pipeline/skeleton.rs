use crate::types::{Hand, NUM_LANDMARKS};

// Bone graph over the 21 landmarks: wrist to each finger chain, plus the
// knuckle arc across the palm.
const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

const BONE_COLOR: [u8; 4] = [255, 255, 255, 255];
const JOINT_COLOR: [u8; 4] = [255, 255, 255, 255];
const BONE_THICKNESS: i32 = 2;
const JOINT_RADIUS: i32 = 2;

/// Rasterize the debug overlay: the active hand's skeleton in white on a
/// black canvas the size of the source frame. No hand yields a plain black
/// canvas so the consumer still advances.
pub fn render_overlay(width: u32, height: u32, hand: Option<&Hand>) -> Vec<u8> {
    let mut canvas = vec![0u8; width as usize * height as usize * 4];
    for px in canvas.chunks_exact_mut(4) {
        px[3] = 255;
    }

    if let Some(hand) = hand {
        draw_hand(&mut canvas, width, height, hand);
    }
    canvas
}

fn draw_hand(buffer: &mut [u8], width: u32, height: u32, hand: &Hand) {
    let mut points = [(0i32, 0i32); NUM_LANDMARKS];
    for (point, landmark) in points.iter_mut().zip(hand.landmarks()) {
        *point = (
            (landmark.x * width as f32) as i32,
            (landmark.y * height as f32) as i32,
        );
    }

    for &(a, b) in CONNECTIONS {
        draw_line(buffer, width, height, points[a], points[b]);
    }
    for &point in &points {
        draw_dot(buffer, width, height, point);
    }
}

fn draw_line(buffer: &mut [u8], width: u32, height: u32, from: (i32, i32), to: (i32, i32)) {
    let (mut x, mut y) = from;
    let (x1, y1) = to;
    let dx = (x1 - x).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let dy = -(y1 - y).abs();
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (BONE_THICKNESS - 1) / 2;

    loop {
        stamp(buffer, width, height, (x, y), radius, BONE_COLOR);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_dot(buffer: &mut [u8], width: u32, height: u32, center: (i32, i32)) {
    stamp(buffer, width, height, center, JOINT_RADIUS, JOINT_COLOR);
}

fn stamp(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
        return;
    }
    let idx = (y as u32 * width + x as u32) as usize * 4;
    if idx + 4 <= buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmark;

    fn centered_hand() -> Hand {
        Hand::new(
            [Landmark {
                x: 0.5,
                y: 0.5,
                z: 0.0,
            }; NUM_LANDMARKS],
        )
    }

    #[test]
    fn empty_overlay_is_opaque_black() {
        let canvas = render_overlay(4, 4, None);
        for px in canvas.chunks_exact(4) {
            assert_eq!(px, [0, 0, 0, 255]);
        }
    }

    #[test]
    fn hand_overlay_marks_pixels() {
        let hand = centered_hand();
        let canvas = render_overlay(32, 32, Some(&hand));
        assert!(canvas.chunks_exact(4).any(|px| px[0] == 255));
    }

    #[test]
    fn out_of_frame_landmarks_do_not_panic() {
        let hand = Hand::new(
            [Landmark {
                x: 3.0,
                y: -2.0,
                z: 0.0,
            }; NUM_LANDMARKS],
        );
        let canvas = render_overlay(8, 8, Some(&hand));
        assert_eq!(canvas.len(), 8 * 8 * 4);
    }
}
