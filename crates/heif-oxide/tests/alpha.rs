//! Auxiliary images: alpha attachment and the aux item graph.

mod common;

use common::{assert_planes_equal, mono_image, stub_context, ycbcr_image};
use heif_oxide::{AuxRole, Channel, CompressionFormat};

const ALPHA_URN: &str = "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha";

#[test]
fn alpha_plane_is_attached_to_the_master() {
    let mut ctx = stub_context();
    let master = ycbcr_image(16, 16, 10);
    let alpha = mono_image(16, 16, 200);
    let master_id = ctx.add_image(&master, CompressionFormat::Hevc).unwrap();
    let alpha_id = ctx.add_image(&alpha, CompressionFormat::Hevc).unwrap();
    ctx.link_auxiliary_image(alpha_id, master_id, ALPHA_URN);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();

    let master_item = reader.item(master_id).unwrap();
    assert_eq!(master_item.alpha_image, Some(alpha_id));
    let alpha_item = reader.item(alpha_id).unwrap();
    assert_eq!(alpha_item.aux_of, Some(master_id));
    assert_eq!(alpha_item.aux_role, AuxRole::Alpha);
    // The alpha image is subordinate: not a top-level image.
    assert_eq!(reader.top_level_image_ids(), vec![master_id]);

    let decoded = reader.decode_item(master_id).unwrap();
    assert!(decoded.has_channel(Channel::Alpha));
    let decoded_alpha = decoded.plane(Channel::Alpha).unwrap();
    let expected = alpha.plane(Channel::Y).unwrap();
    for y in 0..16 {
        assert_eq!(decoded_alpha.row(y), expected.row(y));
    }
    // Color planes are untouched by the attachment.
    assert_planes_equal(&master, &decoded, Channel::Y);
}

#[test]
fn premultiplied_alpha_round_trips() {
    let mut ctx = stub_context();
    let mut master = ycbcr_image(8, 8, 5);
    master.set_premultiplied_alpha(true);
    let alpha = mono_image(8, 8, 60);
    let master_id = ctx.add_image(&master, CompressionFormat::Hevc).unwrap();
    let alpha_id = ctx.add_image(&alpha, CompressionFormat::Hevc).unwrap();
    ctx.link_auxiliary_image(alpha_id, master_id, ALPHA_URN);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    // The prem reference marks the master, not the alpha image.
    assert!(reader.item(master_id).unwrap().premultiplied_alpha);
    assert!(!reader.item(alpha_id).unwrap().premultiplied_alpha);

    let decoded = reader.decode_item(master_id).unwrap();
    assert!(decoded.has_channel(Channel::Alpha));
    assert!(decoded.premultiplied_alpha());

    // And the flag survives another write/read cycle of the parsed file.
    let rewritten = reader.write_to_vec().unwrap();
    let mut second = stub_context();
    second.read_from_bytes(rewritten).unwrap();
    assert!(second.item(master_id).unwrap().premultiplied_alpha);
}

#[test]
fn primary_may_not_be_auxiliary() {
    let mut ctx = stub_context();
    let master = mono_image(8, 8, 0);
    let alpha = mono_image(8, 8, 1);
    let master_id = ctx.add_image(&master, CompressionFormat::Jpeg).unwrap();
    let alpha_id = ctx.add_image(&alpha, CompressionFormat::Jpeg).unwrap();
    ctx.link_auxiliary_image(alpha_id, master_id, ALPHA_URN);
    // Deliberately point pitm at the auxiliary image.
    ctx.set_primary_item(alpha_id);
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    let err = reader.read_from_bytes(bytes).unwrap_err();
    assert_eq!(err.suberror, heif_oxide::Suberror::UnsupportedImageType);
}

#[test]
fn thumbnail_of_thumbnail_is_rejected() {
    use heif_oxide::{FourCC, HeifFile, SecurityLimits};

    let mut file = HeifFile::new_writer(SecurityLimits::default());
    let payload = common::serialize_image(&mono_image(4, 4, 0));
    let a = file.add_item(FourCC::JPEG);
    let b = file.add_item(FourCC::JPEG);
    let c = file.add_item(FourCC::JPEG);
    for id in [a, b, c] {
        file.set_item_data(id, payload.clone());
    }
    file.set_primary_item(a);
    file.add_item_reference(b, FourCC::THMB, &[a]);
    file.add_item_reference(c, FourCC::THMB, &[b]);
    let bytes = file.write().unwrap();

    let mut reader = stub_context();
    let err = reader.read_from_bytes(bytes).unwrap_err();
    assert_eq!(err.suberror, heif_oxide::Suberror::ReferenceCycle);
}

#[test]
fn derivation_cycles_are_rejected() {
    use heif_oxide::{FourCC, HeifFile, SecurityLimits};

    let mut file = HeifFile::new_writer(SecurityLimits::default());
    let a = file.add_item(FourCC::IDEN);
    let b = file.add_item(FourCC::IDEN);
    file.set_item_data(a, Vec::new());
    file.set_item_data(b, Vec::new());
    file.set_primary_item(a);
    file.add_item_reference(a, FourCC::DIMG, &[b]);
    file.add_item_reference(b, FourCC::DIMG, &[a]);
    let bytes = file.write().unwrap();

    let mut reader = stub_context();
    let err = reader.read_from_bytes(bytes).unwrap_err();
    assert_eq!(err.suberror, heif_oxide::Suberror::ReferenceCycle);
}
