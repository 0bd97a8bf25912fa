//! Frame overlay: posture badge plus keypoint skeleton.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::types::{Frame, Keypoints, Point, PostureLabel};

const EMERALD: Rgb<u8> = Rgb([16, 185, 129]);
const BLUE: Rgb<u8> = Rgb([59, 130, 246]);
const ROSE: Rgb<u8> = Rgb([244, 63, 94]);
const SLATE: Rgb<u8> = Rgb([100, 116, 139]);

pub fn label_color(label: PostureLabel) -> Rgb<u8> {
    match label {
        PostureLabel::Standing => EMERALD,
        PostureLabel::Sitting | PostureLabel::Crouching => BLUE,
        PostureLabel::Fallen => ROSE,
        PostureLabel::Unknown => SLATE,
    }
}

/// Copy of `frame` with a badge in the top-left corner coloured by `label`
/// and markers at each keypoint.
pub fn annotate(frame: &Frame, label: PostureLabel, keypoints: Option<&Keypoints>) -> Frame {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return frame.clone();
    }

    let mut image = frame.to_image();
    let color = label_color(label);

    let badge = Rect::at(0, 0).of_size((width / 5).max(8), (height / 12).max(6));
    draw_filled_rect_mut(&mut image, badge, color);

    if let Some(kp) = keypoints {
        draw_skeleton(&mut image, kp, color);
    }

    Frame::from_image(image)
}

fn draw_skeleton(image: &mut RgbImage, kp: &Keypoints, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let to_px = |p: Point| (p.x * width as f32, p.y * height as f32);

    let bones = [
        (kp.left_shoulder, kp.right_shoulder),
        (kp.left_hip, kp.right_hip),
        (kp.left_shoulder, kp.left_hip),
        (kp.right_shoulder, kp.right_hip),
        (kp.left_hip, kp.left_knee),
        (kp.right_hip, kp.right_knee),
        (kp.left_knee, kp.left_ankle),
        (kp.right_knee, kp.right_ankle),
    ];
    for (a, b) in bones {
        draw_line_segment_mut(image, to_px(a), to_px(b), color);
    }

    let radius = (width.min(height) / 120).max(2) as i32;
    for joint in kp.joints() {
        let (x, y) = to_px(joint);
        draw_filled_circle_mut(image, (x as i32, y as i32), radius, color);
    }
}
