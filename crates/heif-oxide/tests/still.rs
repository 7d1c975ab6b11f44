//! Minimal still image round trips through the writer and the reader.

mod common;

use common::{assert_planes_equal, mono_image, stub_context, ycbcr_image};
use heif_oxide::{Channel, CompressionFormat, FourCC};

fn parse_ftyp(bytes: &[u8]) -> heif_oxide::boxes::FtypBox {
    use heif_oxide::MemorySource;
    let source = MemorySource::new(bytes.to_vec());
    let mut cursor = heif_bitstream::SourceCursor::new(&source);
    let mut range = heif_bitstream::BitstreamRange::new(&mut cursor, bytes.len() as u64);
    let limits = heif_oxide::SecurityLimits::default();
    let first = heif_oxide::boxes::read_box(&mut range, &limits, 0).unwrap();
    first.as_ftyp().unwrap().clone()
}

#[test]
fn minimal_hevc_still() {
    let mut ctx = stub_context();
    let image = ycbcr_image(16, 16, 0);
    let item_id = ctx.add_image(&image, CompressionFormat::Hevc).unwrap();
    let bytes = ctx.write_to_vec().unwrap();

    let ftyp = parse_ftyp(&bytes);
    assert_eq!(ftyp.major_brand, FourCC::HEIC);
    assert!(ftyp.has_brand(FourCC::MIF1));

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    assert_eq!(reader.primary_item_id().unwrap(), item_id);

    let item = reader.item(item_id).unwrap();
    assert_eq!(item.item_type, Some(FourCC::HVC1));
    assert_eq!((item.width, item.height), (16, 16));
    let hvcc = item.hvcc().expect("hvcC property must be synthesized");
    assert_eq!(hvcc.chroma_format, 1); // 4:2:0 from the SPS
    assert_eq!(hvcc.bit_depth_luma, 8);
    assert!(!hvcc.nal_arrays.is_empty());

    let decoded = reader.decode_primary_image().unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 16));
    let y = decoded.plane(Channel::Y).unwrap();
    assert_eq!((y.width(), y.height()), (16, 16));
    let cb = decoded.plane(Channel::Cb).unwrap();
    assert_eq!((cb.width(), cb.height()), (8, 8));
    let cr = decoded.plane(Channel::Cr).unwrap();
    assert_eq!((cr.width(), cr.height()), (8, 8));
    assert_planes_equal(&image, &decoded, Channel::Y);
}

#[test]
fn reparse_preserves_the_item_graph() {
    let mut ctx = stub_context();
    let image = mono_image(12, 10, 3);
    let item_id = ctx.add_image(&image, CompressionFormat::Jpeg).unwrap();
    let thumb = mono_image(6, 5, 3);
    let thumb_id = ctx.add_image(&thumb, CompressionFormat::Jpeg).unwrap();
    ctx.assign_thumbnail(thumb_id, item_id);
    let exif_id = ctx.add_exif_metadata(item_id, b"Exif\0\0fake");
    let bytes = ctx.write_to_vec().unwrap();

    // parse -> serialize -> parse must preserve the interpreted graph.
    let mut first = stub_context();
    first.read_from_bytes(bytes).unwrap();
    let rewritten = first.write_to_vec().unwrap();
    let mut second = stub_context();
    second.read_from_bytes(rewritten).unwrap();

    for reader in [&first, &second] {
        assert_eq!(reader.primary_item_id().unwrap(), item_id);
        let item = reader.item(item_id).unwrap();
        assert_eq!(item.thumbnails, vec![thumb_id]);
        assert_eq!(item.metadata, vec![exif_id]);
        assert_eq!(reader.top_level_image_ids(), vec![item_id]);

        let exif = reader.item_data(exif_id).unwrap();
        assert_eq!(&exif[4..], b"Exif\0\0fake");
    }

    let a = first.decode_primary_image().unwrap();
    let b = second.decode_primary_image().unwrap();
    assert_planes_equal(&a, &b, Channel::Y);
}

#[test]
fn xmp_metadata_is_a_mime_item() {
    let mut ctx = stub_context();
    let image = mono_image(4, 4, 9);
    let id = ctx.add_image(&image, CompressionFormat::Jpeg).unwrap();
    let xmp_id = ctx.add_xmp_metadata(id, b"<x:xmpmeta/>");
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    let xmp = reader.item(xmp_id).unwrap();
    assert_eq!(xmp.item_type, Some(FourCC::MIME));
    assert_eq!(xmp.content_type, "application/rdf+xml");
    assert_eq!(reader.item_data(xmp_id).unwrap(), b"<x:xmpmeta/>");
}

#[test]
fn oversized_images_are_rejected_on_read() {
    let mut ctx = stub_context();
    let tile = mono_image(8, 8, 0);
    let ids: Vec<u32> = (0..4)
        .map(|_| ctx.add_image(&tile, CompressionFormat::Jpeg).unwrap())
        .collect();
    // The grid's declared canvas is far beyond the strict limits.
    let grid = ctx.add_grid_image(&ids, 2, 2, 8000, 8000).unwrap();
    ctx.set_primary_item(grid);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = heif_oxide::HeifContext::builder()
        .security_limits(heif_oxide::SecurityLimits::strict())
        .build();
    let err = reader.read_from_bytes(bytes).unwrap_err();
    assert_eq!(err.kind, heif_oxide::ErrorKind::MemoryAllocation);
    assert_eq!(err.suberror, heif_oxide::Suberror::SecurityLimitExceeded);
}
