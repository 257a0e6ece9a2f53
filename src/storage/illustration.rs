//! Annotated output image

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::vision::TextLine;

/// Outline color for detected text lines
pub const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Copy `image` and draw every text line as a closed 2-pixel outline
pub fn draw_illustration(image: &RgbImage, lines: &[TextLine]) -> RgbImage {
    let mut canvas = image.clone();
    for line in lines {
        let corners = line.corners();
        for i in 0..4 {
            let start = corners[i];
            let end = corners[(i + 1) % 4];
            draw_thick_segment(&mut canvas, start, end);
        }
    }
    canvas
}

/// Two adjacent 1-pixel strokes, the second one pixel across the edge
///
/// The step is taken along the axis the edge runs least along, towards the
/// inside of the canvas when the edge sits on its far border.
fn draw_thick_segment(canvas: &mut RgbImage, start: (f32, f32), end: (f32, f32)) {
    let start = (start.0.floor(), start.1.floor());
    let end = (end.0.floor(), end.1.floor());
    let (width, height) = canvas.dimensions();

    let (step_x, step_y) = if (end.0 - start.0).abs() >= (end.1 - start.1).abs() {
        let towards = if start.1.max(end.1) + 1.0 >= height as f32 { -1.0 } else { 1.0 };
        (0.0, towards)
    } else {
        let towards = if start.0.max(end.0) + 1.0 >= width as f32 { -1.0 } else { 1.0 };
        (towards, 0.0)
    };

    draw_line_segment_mut(canvas, start, end, OUTLINE_COLOR);
    draw_line_segment_mut(
        canvas,
        (start.0 + step_x, start.1 + step_y),
        (end.0 + step_x, end.1 + step_y),
        OUTLINE_COLOR,
    );
}
