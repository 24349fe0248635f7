use crate::db::indices::PathId;
use crate::geom::coord::{GridCoord, PathPoint};
use crate::grid::cell::cell_flags;
use crate::grid::map::RouteMap;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as ImageRect;
use std::path::Path;

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([80, 160, 255]),
    Rgb([90, 220, 120]),
    Rgb([250, 200, 70]),
    Rgb([200, 120, 255]),
    Rgb([90, 220, 220]),
    Rgb([250, 140, 90]),
    Rgb([160, 200, 90]),
    Rgb([230, 110, 170]),
];

fn net_color(path: PathId) -> Rgb<u8> {
    PALETTE[path.index() % PALETTE.len()]
}

/// Writes one PNG per routing layer: barriers, swap zones, routed
/// centerlines and DRC cells.
pub fn draw_routed_layers(
    map: &RouteMap,
    paths: &[Vec<PathPoint>],
    starts: &[GridCoord],
    prefix: &str,
) {
    let scale = (1000 / map.width().max(map.height())).clamp(2, 16);
    let img_w = map.width() * scale;
    let img_h = map.height() * scale;

    for z in 0..map.layers() {
        let mut img = RgbImage::from_pixel(img_w, img_h, Rgb([20, 20, 20]));

        let color_barrier = Rgb([90, 90, 90]);
        let color_swap = Rgb([50, 70, 50]);
        let color_drc = Rgb([255, 40, 40]);

        for y in 0..map.height() {
            for x in 0..map.width() {
                let cell = map.cell(GridCoord::new(x, y, z));
                let color = if cell.has_flag(cell_flags::TRACE_BARRIER) {
                    Some(color_barrier)
                } else if cell.swap_zone != 0 {
                    Some(color_swap)
                } else {
                    None
                };
                if let Some(c) = color {
                    let rect = ImageRect::at((x * scale) as i32, ((map.height() - 1 - y) * scale) as i32)
                        .of_size(scale, scale);
                    draw_filled_rect_mut(&mut img, rect, c);
                }
            }
        }

        for (i, path) in paths.iter().enumerate() {
            let color = net_color(PathId::new(i));
            let mut prev = starts.get(i).copied();
            for point in path {
                if let Some(p) = prev {
                    if p.z == z && point.coord.z == z {
                        let to_px = |c: GridCoord| {
                            (
                                (c.x * scale + scale / 2) as f32,
                                ((map.height() - 1 - c.y) * scale + scale / 2) as f32,
                            )
                        };
                        draw_line_segment_mut(&mut img, to_px(p), to_px(point.coord), color);
                    } else if p.same_column(point.coord) && (p.z == z || point.coord.z == z) {
                        // Via marker.
                        let rect = ImageRect::at(
                            (point.coord.x * scale) as i32,
                            ((map.height() - 1 - point.coord.y) * scale) as i32,
                        )
                        .of_size(scale, scale);
                        draw_filled_rect_mut(&mut img, rect, Rgb([240, 240, 240]));
                    }
                }
                prev = Some(point.coord);
            }
        }

        for y in 0..map.height() {
            for x in 0..map.width() {
                if map.cell(GridCoord::new(x, y, z)).has_flag(cell_flags::DRC) {
                    let rect = ImageRect::at((x * scale) as i32, ((map.height() - 1 - y) * scale) as i32)
                        .of_size(scale, scale);
                    draw_filled_rect_mut(&mut img, rect, color_drc);
                }
            }
        }

        let filename = format!("{}_layer{}.png", prefix, z);
        let _ = img.save(Path::new(&filename));
    }
}
