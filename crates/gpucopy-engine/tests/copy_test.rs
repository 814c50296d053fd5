//! Round-trip copies through the software device.

mod common;

use common::*;
use gpucopy_core::{CopyError, Format, FrameDescriptor, HostLayout, Roi};
use gpucopy_engine::{CopyRequest, EngineConfig, HostFrame, Transform};

#[test]
fn test_packed_round_trip_with_padding() {
    let engine = engine();
    let roi = Roi::new(64, 32);
    let s = surface(&engine, 1, Format::Rgb4, 64, 32);

    let src = filled(Format::Rgb4, roi, HostLayout::with_stride(320), 1);
    upload(&engine, s, &src);

    // surface rows are tightly packed
    let bytes = engine.device().surface_bytes(s).unwrap();
    assert_eq!(&bytes[256 * 5..256 * 6], src.row(5));

    let mut dst = HostFrame::new(Format::Rgb4, roi, HostLayout::with_stride(512)).unwrap();
    download(&engine, &mut dst, s);
    assert_rows_eq(&src, &dst);

    let stats = engine.device().stats();
    assert_eq!(stats.dispatches, 2);
    assert_eq!(stats.live_objects, 0);
}

#[test]
fn test_nv12_round_trip_with_chroma_offset() {
    let engine = engine();
    let roi = Roi::new(64, 32);
    let s = surface(&engine, 1, Format::Nv12, 64, 32);

    // chroma 8 rows below the last luma row
    let src = filled(Format::Nv12, roi, HostLayout::new(80, 40), 2);
    upload(&engine, s, &src);

    let bytes = engine.device().surface_bytes(s).unwrap();
    assert_eq!(&bytes[64 * 31..64 * 32], src.row(31));
    assert_eq!(&bytes[64 * 32..64 * 33], src.chroma_row(0));

    let mut dst = HostFrame::new(Format::Nv12, roi, HostLayout::new(96, 32)).unwrap();
    download(&engine, &mut dst, s);
    assert_rows_eq(&src, &dst);
}

#[test]
fn test_1080p_nv12_single_dispatch() {
    let engine = engine();
    let roi = Roi::new(1920, 1080);
    let s = surface(&engine, 1, Format::Nv12, 1920, 1080);
    let frame = filled(Format::Nv12, roi, HostLayout::default(), 3);

    upload(&engine, s, &frame);

    let stats = engine.device().stats();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.buffers_created, 1);
    assert_eq!(stats.surfaces_opened, 1);
    assert_eq!(stats.live_objects, 0);
    assert_eq!(engine.device().surface_bytes(s).unwrap(), frame.as_bytes());
}

#[test]
fn test_sliced_packed_round_trip() {
    let engine = engine_with(EngineConfig::default().max_linear_size(64 * 1024));
    let roi = Roi::new(256, 256);
    let s = surface(&engine, 1, Format::Rgb4, 256, 256);

    // 256 KiB at a 0x100 page offset: every slice holds 32 rows
    let mut src = HostFrame::at_page_offset(Format::Rgb4, roi, HostLayout::default(), 0x100).unwrap();
    src.fill_with(pattern(4));
    upload(&engine, s, &src);
    assert_eq!(engine.device().stats().dispatches, 8);
    assert_eq!(engine.device().stats().buffers_created, 8);

    let mut dst = HostFrame::at_page_offset(Format::Rgb4, roi, HostLayout::default(), 0x100).unwrap();
    download(&engine, &mut dst, s);
    assert_rows_eq(&src, &dst);
    assert_eq!(engine.device().stats().live_objects, 0);
}

#[test]
fn test_sliced_nv12_round_trip() {
    let engine = engine_with(EngineConfig::default().max_linear_size(16 * 1024));
    let roi = Roi::new(256, 128);
    let s = surface(&engine, 1, Format::Nv12, 256, 128);

    // 192 span rows of 256 bytes: luma, luma, chroma
    let mut src = HostFrame::at_page_offset(Format::Nv12, roi, HostLayout::default(), 0).unwrap();
    src.fill_with(pattern(5));
    upload(&engine, s, &src);
    assert_eq!(engine.device().stats().dispatches, 3);
    assert_eq!(engine.device().surface_bytes(s).unwrap(), src.as_bytes());

    let mut dst = HostFrame::new(Format::Nv12, roi, HostLayout::default()).unwrap();
    download(&engine, &mut dst, s);
    assert_rows_eq(&src, &dst);
}

#[test]
fn test_repeated_copies_reuse_resources() {
    let engine = engine();
    let roi = Roi::new(64, 64);
    let s = surface(&engine, 1, Format::Yuy2, 64, 64);
    let frame = filled(Format::Yuy2, roi, HostLayout::default(), 6);

    for _ in 0..3 {
        upload(&engine, s, &frame);
    }
    let stats = engine.device().stats();
    assert_eq!(stats.buffers_created, 1);
    assert_eq!(stats.surfaces_opened, 1);
    assert_eq!(stats.dispatches, 3);

    let cache = engine.cache_stats();
    assert_eq!((cache.buffers, cache.surfaces), (1, 1));
    assert_eq!(cache.misses, 2);
    assert_eq!(cache.hits, 4);
}

#[test]
fn test_swap_round_trip() {
    let engine = engine();
    let roi = Roi::new(128, 16);
    let s = surface(&engine, 1, Format::Rgb4, 128, 16);
    let device = FrameDescriptor::device(Format::Rgb4, 128, 16, s);

    let bgr = filled(Format::Bgr4, roi, HostLayout::default(), 7);
    assert!(engine.can_accelerate(&device, &bgr.descriptor()));
    unsafe { engine.copy_frame(&device, &bgr.descriptor()).unwrap() };

    let bytes = engine.device().surface_bytes(s).unwrap();
    for (px, host) in bytes.chunks_exact(4).zip(bgr.as_bytes().chunks_exact(4)) {
        assert_eq!(px, [host[2], host[1], host[0], host[3]]);
    }

    let mut back = HostFrame::new(Format::Bgr4, roi, HostLayout::default()).unwrap();
    unsafe { engine.copy_frame(&back.descriptor_mut(), &device).unwrap() };
    assert_rows_eq(&bgr, &back);
}

#[test]
fn test_mirror_round_trip() {
    let engine = engine();
    let roi = Roi::new(32, 16);
    let s = surface(&engine, 1, Format::Nv12, 32, 16);
    let src = filled(Format::Nv12, roi, HostLayout::default(), 8);

    let up = CopyRequest::host_to_device(s, src.as_ptr(), src.layout(), roi, Format::Nv12)
        .with_transform(Transform::Mirror);
    unsafe { engine.execute(&up).unwrap() };

    let bytes = engine.device().surface_bytes(s).unwrap();
    let luma0: Vec<u8> = src.row(0).iter().rev().copied().collect();
    assert_eq!(&bytes[..32], &luma0[..]);
    let chroma0: Vec<u8> = src.chroma_row(0).chunks_exact(2).rev().flatten().copied().collect();
    assert_eq!(&bytes[32 * 16..32 * 17], &chroma0[..]);

    let mut back = HostFrame::new(Format::Nv12, roi, HostLayout::default()).unwrap();
    let down = CopyRequest::device_to_host(back.as_mut_ptr(), back.layout(), s, roi, Format::Nv12)
        .with_transform(Transform::Mirror);
    unsafe { engine.execute(&down).unwrap() };
    assert_rows_eq(&src, &back);
}

#[test]
fn test_p010_shift_round_trip() {
    let engine = engine();
    let roi = Roi::new(64, 32);
    let s = surface(&engine, 1, Format::P010, 64, 32);
    let device = FrameDescriptor::device(Format::P010, 64, 32, s).with_shift(1);

    // 10-bit LSB-justified samples
    let mut src = HostFrame::new(Format::P010, roi, HostLayout::default()).unwrap();
    for (i, px) in src.as_bytes_mut().chunks_exact_mut(2).enumerate() {
        px.copy_from_slice(&((i as u16).wrapping_mul(37) & 0x3FF).to_le_bytes());
    }
    let host = src.descriptor().with_bit_depth(10);
    unsafe { engine.copy_frame(&device, &host).unwrap() };

    let bytes = engine.device().surface_bytes(s).unwrap();
    for (dev, lsb) in bytes.chunks_exact(2).zip(src.as_bytes().chunks_exact(2)) {
        let v = u16::from_le_bytes([lsb[0], lsb[1]]);
        assert_eq!(u16::from_le_bytes([dev[0], dev[1]]), v << 6);
    }

    let mut back = HostFrame::new(Format::P010, roi, HostLayout::default()).unwrap();
    let back_desc = back.descriptor_mut().with_bit_depth(10);
    unsafe { engine.copy_frame(&back_desc, &device).unwrap() };
    assert_rows_eq(&src, &back);
}

#[test]
fn test_device_to_device() {
    let engine = engine();
    let roi = Roi::new(48, 24);
    let a = surface(&engine, 1, Format::Uyvy, 48, 24);
    let b = surface(&engine, 2, Format::Uyvy, 64, 32);
    let data: Vec<u8> = (0..48 * 2 * 24).map(pattern(9)).collect();
    engine.device().load_surface(a, &data).unwrap();

    engine.copy_device_to_device(b, a, roi, Format::Uyvy).unwrap();

    let out = engine.device().surface_bytes(b).unwrap();
    for y in 0..24 {
        assert_eq!(&out[y * 128..y * 128 + 96], &data[y * 96..(y + 1) * 96], "row {y}");
    }
    // outside the region stays untouched
    assert!(out[96..128].iter().all(|&v| v == 0));
}

#[test]
fn test_device_swap_and_mirror() {
    let engine = engine();
    let argb = surface(&engine, 1, Format::Argb16, 16, 8);
    let abgr = surface(&engine, 2, Format::Abgr16, 16, 8);
    let data: Vec<u8> = (0..16 * 8 * 8).map(pattern(10)).collect();
    engine.device().load_surface(argb, &data).unwrap();

    let dst = FrameDescriptor::device(Format::Abgr16, 16, 8, abgr);
    let src = FrameDescriptor::device(Format::Argb16, 16, 8, argb);
    unsafe { engine.copy_frame(&dst, &src).unwrap() };
    let out = engine.device().surface_bytes(abgr).unwrap();
    for (o, i) in out.chunks_exact(8).zip(data.chunks_exact(8)) {
        assert_eq!(o, [i[4], i[5], i[2], i[3], i[0], i[1], i[6], i[7]]);
    }

    let n1 = surface(&engine, 3, Format::Nv12, 32, 16);
    let n2 = surface(&engine, 4, Format::Nv12, 32, 16);
    let nv: Vec<u8> = (0..32 * 24).map(pattern(11)).collect();
    engine.device().load_surface(n1, &nv).unwrap();
    let mirror = CopyRequest::device_to_device(n2, n1, Roi::new(32, 16), Format::Nv12).with_transform(Transform::Mirror);
    unsafe { engine.execute(&mirror).unwrap() };
    let out = engine.device().surface_bytes(n2).unwrap();
    let row: Vec<u8> = nv[32 * 3..32 * 4].iter().rev().copied().collect();
    assert_eq!(&out[32 * 3..32 * 4], &row[..]);
}

#[test]
fn test_surface_limits_enforced_by_device() {
    let engine = engine();
    let s = surface(&engine, 1, Format::Rgb4, 32, 32);
    let frame = filled(Format::Rgb4, Roi::new(64, 32), HostLayout::default(), 12);
    // region wider than the surface
    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::ResourceCreationFailed(_)));
    assert_eq!(engine.cache_stats().surfaces, 0);
}
