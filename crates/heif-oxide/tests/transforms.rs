//! Transform properties applied after decoding: rotation, mirroring, overlays.

mod common;

use common::{mono_image, stub_context};
use heif_oxide::{Channel, Chroma, Colorspace, CompressionFormat, MirrorAxis, PixelImage};

#[test]
fn rotation_by_90_ccw() {
    let mut ctx = stub_context();
    let image = mono_image(8, 4, 7);
    let id = ctx.add_image(&image, CompressionFormat::Jpeg).unwrap();
    ctx.add_rotation(id, 1);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    let decoded = reader.decode_primary_image().unwrap();

    assert_eq!((decoded.width(), decoded.height()), (4, 8));
    let src = image.plane(Channel::Y).unwrap();
    let dst = decoded.plane(Channel::Y).unwrap();
    for y in 0..8 {
        for x in 0..4 {
            assert_eq!(dst.sample(x, y), src.sample(y, 3 - x), "at ({x},{y})");
        }
    }
}

#[test]
fn mirror_vertical_axis() {
    let mut ctx = stub_context();
    let image = mono_image(6, 3, 20);
    let id = ctx.add_image(&image, CompressionFormat::Jpeg).unwrap();
    ctx.add_mirror(id, MirrorAxis::Vertical);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    let decoded = reader.decode_primary_image().unwrap();

    let src = image.plane(Channel::Y).unwrap();
    let dst = decoded.plane(Channel::Y).unwrap();
    for y in 0..3 {
        for x in 0..6 {
            assert_eq!(dst.sample(x, y), src.sample(5 - x, y));
        }
    }
}

#[test]
fn identity_item_applies_its_own_transforms() {
    let mut ctx = stub_context();
    let image = mono_image(8, 4, 40);
    let source_id = ctx.add_image(&image, CompressionFormat::Jpeg).unwrap();
    let iden_id = ctx.add_identity_image(source_id, 8, 4).unwrap();
    ctx.add_rotation(iden_id, 2);
    ctx.set_primary_item(iden_id);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    let decoded = reader.decode_primary_image().unwrap();

    assert_eq!((decoded.width(), decoded.height()), (8, 4));
    let src = image.plane(Channel::Y).unwrap();
    let dst = decoded.plane(Channel::Y).unwrap();
    for y in 0..4 {
        for x in 0..8 {
            assert_eq!(dst.sample(x, y), src.sample(7 - x, 3 - y));
        }
    }
}

fn rgb_image(width: u32, height: u32, rgb: (u16, u16, u16)) -> PixelImage {
    let mut image = PixelImage::new(width, height, Colorspace::Rgb, Chroma::C444);
    for c in [Channel::R, Channel::G, Channel::B] {
        image.add_plane(c, width, height, 8).unwrap();
    }
    image.fill_rgb_16bit(rgb.0, rgb.1, rgb.2, 0xffff).unwrap();
    image
}

#[test]
fn overlay_composites_in_order_with_clipping() {
    let mut ctx = stub_context();
    let white = rgb_image(2, 2, (0xffff, 0xffff, 0xffff));
    let red = rgb_image(2, 2, (0xffff, 0, 0));
    let white_id = ctx.add_image(&white, CompressionFormat::Jpeg).unwrap();
    let red_id = ctx.add_image(&red, CompressionFormat::Jpeg).unwrap();

    let overlay_id = ctx
        .add_overlay_image(
            &[white_id, red_id],
            // The red tile partially covers the white one and hangs off the canvas edge.
            &[(0, 0), (3, 3)],
            4,
            4,
            [0, 0, 0, 0xffff],
        )
        .unwrap();
    ctx.set_primary_item(overlay_id);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    let decoded = reader.decode_item(overlay_id).unwrap();

    assert_eq!(decoded.colorspace(), Colorspace::Rgb);
    let r = decoded.plane(Channel::R).unwrap();
    let g = decoded.plane(Channel::G).unwrap();
    // Background shows where nothing was composited.
    assert_eq!((r.sample(2, 0), g.sample(2, 0)), (0, 0));
    // First image.
    assert_eq!((r.sample(0, 0), g.sample(0, 0)), (0xff, 0xff));
    // Second image on top, clipped at the canvas border.
    assert_eq!((r.sample(3, 3), g.sample(3, 3)), (0xff, 0));
}
