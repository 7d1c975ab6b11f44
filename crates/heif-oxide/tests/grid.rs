//! Grid derived images: tiling, blit positions, and tile validation.

mod common;

use common::{mono_image, stub_context};
use heif_oxide::{Channel, CompressionFormat, DecodePool};

#[test]
fn two_by_two_grid() {
    let mut ctx = stub_context();
    let tiles: Vec<_> = (0..4).map(|i| mono_image(8, 8, i * 50)).collect();
    let tile_ids: Vec<u32> = tiles
        .iter()
        .map(|t| ctx.add_image(t, CompressionFormat::Jpeg).unwrap())
        .collect();
    let grid_id = ctx.add_grid_image(&tile_ids, 2, 2, 16, 16).unwrap();
    ctx.set_primary_item(grid_id);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    assert_eq!(reader.top_level_image_ids(), vec![grid_id]);

    let decoded = reader.decode_primary_image().unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 16));
    let y = decoded.plane(Channel::Y).unwrap();

    // Top-left quadrant comes from tile 0, bottom-right from tile 3.
    let tile0 = tiles[0].plane(Channel::Y).unwrap();
    let tile3 = tiles[3].plane(Channel::Y).unwrap();
    assert_eq!(y.sample(7, 7), tile0.sample(7, 7));
    assert_eq!(y.sample(8, 8), tile3.sample(0, 0));
    assert_eq!(y.sample(0, 0), tile0.sample(0, 0));
    assert_eq!(y.sample(15, 15), tile3.sample(7, 7));
}

#[test]
fn grid_decodes_with_a_thread_pool() {
    let mut ctx = heif_oxide::HeifContext::builder()
        .pool(DecodePool::with_max_threads(4))
        .build();
    // Plugins are registered after build here to exercise the mutable registration path.
    ctx.register_decoder(std::sync::Arc::new(common::StubJpegPlugin));
    ctx.register_encoder(std::sync::Arc::new(common::StubJpegPlugin));

    let tiles: Vec<_> = (0..9).map(|i| mono_image(4, 4, i * 11)).collect();
    let tile_ids: Vec<u32> = tiles
        .iter()
        .map(|t| ctx.add_image(t, CompressionFormat::Jpeg).unwrap())
        .collect();
    let grid_id = ctx.add_grid_image(&tile_ids, 3, 3, 12, 12).unwrap();
    ctx.set_primary_item(grid_id);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = heif_oxide::HeifContext::builder()
        .max_decoding_threads(4)
        .build();
    reader.register_decoder(std::sync::Arc::new(common::StubJpegPlugin));
    reader.read_from_bytes(bytes).unwrap();
    let decoded = reader.decode_primary_image().unwrap();

    let y = decoded.plane(Channel::Y).unwrap();
    for (i, tile) in tiles.iter().enumerate() {
        let (x0, y0) = ((i % 3) as u32 * 4, (i / 3) as u32 * 4);
        let t = tile.plane(Channel::Y).unwrap();
        for yy in 0..4 {
            for xx in 0..4 {
                assert_eq!(
                    y.sample(x0 + xx, y0 + yy),
                    t.sample(xx, yy),
                    "tile {i} pixel ({xx},{yy})"
                );
            }
        }
    }
}

#[test]
fn wrong_tile_count_is_rejected() {
    let mut ctx = stub_context();
    let tile = mono_image(8, 8, 1);
    let ids: Vec<u32> = (0..3)
        .map(|_| ctx.add_image(&tile, CompressionFormat::Jpeg).unwrap())
        .collect();
    // 3 tiles cannot fill a 2x2 grid.
    assert!(ctx.add_grid_image(&ids, 2, 2, 16, 16).is_err());
}

#[test]
fn missing_grid_tiles_fail_interpretation() {
    // Build a grid declaring 2x2 tiles but referencing only three, straight through the file
    // layer.
    use heif_oxide::{FourCC, HeifFile, ImageGrid, SecurityLimits};

    let mut file = HeifFile::new_writer(SecurityLimits::default());
    let tile_payload = common::serialize_image(&mono_image(8, 8, 1));
    let mut tile_ids = Vec::new();
    for _ in 0..3 {
        let id = file.add_item(FourCC::JPEG);
        file.set_item_data(id, tile_payload.clone());
        tile_ids.push(id);
    }
    let grid_id = file.add_item(FourCC::GRID);
    let grid = ImageGrid {
        rows: 2,
        columns: 2,
        output_width: 16,
        output_height: 16,
    };
    file.set_item_data(grid_id, grid.to_bytes());
    file.add_item_reference(grid_id, FourCC::DIMG, &tile_ids);
    file.set_primary_item(grid_id);
    let bytes = file.write().unwrap();

    let mut reader = stub_context();
    let err = reader.read_from_bytes(bytes).unwrap_err();
    assert_eq!(err.suberror, heif_oxide::Suberror::MissingGridTiles);
}
