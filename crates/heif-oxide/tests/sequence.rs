//! Image sequences: visual and metadata tracks, sample iteration, auxiliary info.

mod common;

use common::{assert_planes_equal, stub_context, ycbcr_image};
use heif_oxide::{
    Channel, CompressionFormat, FourCC, SampleAuxPresence, TaiClockInfo, TaiTimestamp,
    TrackOptions,
};

const URIM_URI: &str = "urn:smpte:ul:0123456789abcdef";

#[test]
fn visual_and_metadata_tracks() {
    let mut ctx = stub_context();

    let video = ctx.add_visual_sequence_track(16, 16, TrackOptions::default());
    let frames: Vec<_> = (0..3).map(|i| ycbcr_image(16, 16, i * 30)).collect();
    for frame in &frames {
        ctx.encode_sequence_image(video, frame, CompressionFormat::Hevc, 100, true, None, None)
            .unwrap();
    }
    ctx.finalize_track(video).unwrap();

    let meta = ctx.add_uri_metadata_sequence_track(URIM_URI, TrackOptions::default());
    let durations = [10u32, 20, 30, 40, 50];
    for (i, &duration) in durations.iter().enumerate() {
        let payload = format!("telemetry packet {i}");
        ctx.add_raw_sequence_sample(meta, payload.as_bytes(), duration, None, None)
            .unwrap();
    }
    ctx.add_track_reference(meta, FourCC::CDSC, video).unwrap();
    ctx.finalize_track(meta).unwrap();

    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    assert_eq!(reader.track_ids(), vec![video, meta]);

    let video_track = reader.track(video).unwrap();
    assert!(video_track.is_visual());
    assert_eq!((video_track.width(), video_track.height()), (16, 16));
    assert_eq!(video_track.sample_count(), 3);
    assert_eq!(video_track.timescale(), 90000);
    assert_eq!(video_track.duration_in_media_units(), 300);

    let meta_track = reader.track(meta).unwrap();
    assert!(!meta_track.is_visual());
    assert_eq!(meta_track.urim_sample_entry_uri(), Some(URIM_URI));
    assert_eq!(meta_track.duration_in_media_units(), 150);

    // The metadata track announces itself as describing the video track.
    assert_eq!(reader.find_referring_tracks(video, FourCC::CDSC), vec![meta]);
    assert!(reader.find_referring_tracks(meta, FourCC::CDSC).is_empty());

    // Iterate the metadata track: exactly five samples with their declared durations.
    for (i, &duration) in durations.iter().enumerate() {
        let sample = reader.get_next_raw_sequence_sample(meta).unwrap();
        assert_eq!(sample.duration, duration);
        assert_eq!(sample.data, format!("telemetry packet {i}").into_bytes());
    }
    let err = reader.get_next_raw_sequence_sample(meta).unwrap_err();
    assert!(err.is_end_of_sequence());

    // Iterate the visual track.
    for frame in &frames {
        let decoded = reader.decode_next_image_sample(video).unwrap();
        assert_eq!(decoded.sample_duration(), 100);
        assert_planes_equal(frame, &decoded, Channel::Y);
    }
    let err = reader.decode_next_image_sample(video).unwrap_err();
    assert!(err.is_end_of_sequence());
}

#[test]
fn tai_timestamps_and_content_ids() {
    let mut ctx = stub_context();
    let options = TrackOptions {
        with_tai_timestamps: SampleAuxPresence::Optional,
        tai_clock_info: Some(TaiClockInfo {
            time_uncertainty: 500,
            clock_resolution: 1,
            clock_drift_rate: 0,
            clock_type: 1,
        }),
        with_gimi_content_ids: SampleAuxPresence::Optional,
        gimi_track_content_id: Some("urn:uuid:11112222-3333-4444-5555-666677778888".to_string()),
        ..Default::default()
    };
    let video = ctx.add_visual_sequence_track(8, 8, options);

    let tai = TaiTimestamp {
        tai_timestamp: 1_700_000_000_000_000_000,
        synchronization_state: true,
        timestamp_generation_failure: false,
        timestamp_is_modified: false,
    };
    let frame = ycbcr_image(8, 8, 1);
    ctx.encode_sequence_image(
        video,
        &frame,
        CompressionFormat::Hevc,
        50,
        true,
        Some(&tai),
        Some("urn:uuid:sample-0"),
    )
    .unwrap();
    ctx.encode_sequence_image(video, &frame, CompressionFormat::Hevc, 50, false, None, None)
        .unwrap();
    ctx.finalize_track(video).unwrap();
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();

    let track = reader.track(video).unwrap();
    assert_eq!(
        track.gimi_track_content_id(),
        Some("urn:uuid:11112222-3333-4444-5555-666677778888")
    );

    let first = reader.decode_next_image_sample(video).unwrap();
    assert_eq!(first.tai_timestamp(), Some(&tai));
    assert_eq!(first.gimi_content_id(), Some("urn:uuid:sample-0"));

    let second = reader.decode_next_image_sample(video).unwrap();
    assert_eq!(second.tai_timestamp(), None);
    assert_eq!(second.gimi_content_id(), None);
}

#[test]
fn interleaved_aux_info_blocks() {
    // Force one chunk per sample-description change and interleaved aux blocks, then make
    // sure iteration still finds every annotation.
    let mut ctx = stub_context();
    let options = TrackOptions {
        interleaved_sample_aux_infos: true,
        with_gimi_content_ids: SampleAuxPresence::Optional,
        ..Default::default()
    };
    let video = ctx.add_visual_sequence_track(8, 8, options);
    let frame = ycbcr_image(8, 8, 2);
    for i in 0..4 {
        ctx.encode_sequence_image(
            video,
            &frame,
            CompressionFormat::Hevc,
            25,
            i == 0,
            None,
            Some(&format!("urn:uuid:sample-{i}")),
        )
        .unwrap();
    }
    ctx.finalize_track(video).unwrap();
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    for i in 0..4 {
        let decoded = reader.decode_next_image_sample(video).unwrap();
        assert_eq!(
            decoded.gimi_content_id(),
            Some(format!("urn:uuid:sample-{i}").as_str())
        );
    }
}

#[test]
fn sequence_only_file_brand() {
    let mut ctx = stub_context();
    let video = ctx.add_visual_sequence_track(8, 8, TrackOptions::default());
    ctx.encode_sequence_image(
        video,
        &ycbcr_image(8, 8, 0),
        CompressionFormat::Hevc,
        10,
        true,
        None,
        None,
    )
    .unwrap();
    ctx.finalize_track(video).unwrap();
    let bytes = ctx.write_to_vec().unwrap();

    let mut reader = stub_context();
    reader.read_from_bytes(bytes).unwrap();
    assert_eq!(reader.track_ids(), vec![video]);
    assert!(reader.primary_item_id().is_err());
}
