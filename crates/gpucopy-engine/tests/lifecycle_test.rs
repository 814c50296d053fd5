//! Validation, fault handling, teardown and concurrency.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::*;
use gpucopy_core::{CopyError, Format, FrameDescriptor, HostLayout, HostPlanes, PAGE_MASK, Roi};
use gpucopy_engine::device::Destroyed;
use gpucopy_engine::{CopyRequest, EngineConfig, HostFrame};

#[test]
fn test_misaligned_pointer_makes_no_device_calls() {
    let engine = engine();
    let s = surface(&engine, 1, Format::Rgb4, 64, 16);
    let frame = HostFrame::at_page_offset(Format::Rgb4, Roi::new(64, 16), HostLayout::default(), 1).unwrap();

    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::InvalidAlignment { what: "host pointer", .. }));
    assert!(err.is_retryable_elsewhere());

    let stats = engine.device().stats();
    assert_eq!(stats.buffers_created, 0);
    assert_eq!(stats.surfaces_opened, 0);
    assert_eq!(stats.kernels_created, 0);
    assert!(engine.cache_stats().buffers == 0 && engine.cache_stats().surfaces == 0);
}

#[test]
fn test_misaligned_stride() {
    let engine = engine();
    let s = surface(&engine, 1, Format::Rgb4, 64, 16);
    let frame = HostFrame::new(Format::Rgb4, Roi::new(64, 16), HostLayout::with_stride(264)).unwrap();
    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::InvalidAlignment { what: "stride", .. }));
}

#[test]
fn test_planar_format_not_accelerated() {
    let engine = engine();
    let s = surface(&engine, 1, Format::Nv12, 64, 64);
    let device = FrameDescriptor::device(Format::Yv12, 64, 64, s);
    // never dereferenced
    let host = FrameDescriptor::host(Format::Yv12, 64, 64, HostPlanes::packed(0x10_0000, 64));

    assert!(!engine.can_accelerate(&device, &host));
    assert!(!engine.can_accelerate(&host, &device));
    assert!(matches!(
        unsafe { engine.copy_frame(&device, &host) },
        Err(CopyError::UnsupportedFormat(_))
    ));
    let req = CopyRequest::host_to_device(s, 0x10_0000 as *const u8, HostLayout::default(), Roi::new(64, 64), Format::Yv12);
    assert!(matches!(unsafe { engine.execute(&req) }, Err(CopyError::UnsupportedFormat(_))));
    assert!(engine.cache_stats().buffers == 0 && engine.cache_stats().surfaces == 0);
    assert_eq!(engine.device().stats().kernels_created, 0);
}

#[test]
fn test_teardown_order() {
    let mut engine = engine();
    let roi = Roi::new(128, 128);
    let d = surface(&engine, 10, Format::Rgb4, 128, 128);
    let e = surface(&engine, 11, Format::Rgb4, 128, 128);
    let a = filled(Format::Rgb4, roi, HostLayout::default(), 1);
    let b = filled(Format::Rgb4, roi, HostLayout::default(), 2);
    let c = filled(Format::Rgb4, roi, HostLayout::default(), 3);

    upload(&engine, d, &a);
    upload(&engine, d, &b);
    upload(&engine, e, &c);
    engine.release();

    let page = |f: &HostFrame| f.as_ptr() as usize & !PAGE_MASK;
    let order: Vec<Destroyed> = engine.device().destroyed();
    assert_eq!(order.len(), 6);
    let bases: Vec<usize> = order[..3]
        .iter()
        .map(|x| match x {
            Destroyed::Buffer { base, .. } => *base,
            other => panic!("expected buffer, got {other:?}"),
        })
        .collect();
    assert_eq!(bases, vec![page(&c), page(&b), page(&a)]);
    assert_eq!(&order[3..], &[Destroyed::Surface(e), Destroyed::Surface(d), Destroyed::Program]);
    assert!(engine.cache_stats().buffers == 0 && engine.cache_stats().surfaces == 0);
}

#[test]
fn test_hang_reports_timeout() {
    let frame = filled(Format::Nv12, Roi::new(64, 32), HostLayout::default(), 1);
    let engine = engine_with(EngineConfig::default().timeout(Duration::from_millis(50)));
    let s = surface(&engine, 1, Format::Nv12, 64, 32);
    engine.device().faults().hang(true);

    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Nv12)
    }
    .unwrap_err();
    assert_eq!(err, CopyError::OperationTimedOut { timeout_ms: 50 });
    assert!(err.is_device_hang());
    assert_eq!(engine.device().stats().live_objects, 0);
}

#[test]
fn test_kernel_failure() {
    let frame = filled(Format::Rgb4, Roi::new(32, 8), HostLayout::default(), 1);
    let engine = engine();
    let s = surface(&engine, 1, Format::Rgb4, 32, 8);
    engine.device().faults().fail_kernels(true);
    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::DeviceOperationFailed(_)));
}

#[test]
fn test_enqueue_failure_aborts_remaining_slices() {
    let frame = filled(Format::Rgb4, Roi::new(256, 256), HostLayout::default(), 1);
    let engine = engine_with(EngineConfig::default().max_linear_size(64 * 1024));
    let s = surface(&engine, 1, Format::Rgb4, 256, 256);
    engine.device().faults().fail_enqueue_after(Some(2));

    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::DeviceOperationFailed(_)));

    let stats = engine.device().stats();
    assert_eq!(stats.dispatches, 2);
    // the failed slice got its buffer, later slices never did
    assert_eq!(stats.buffers_created, 3);
    assert_eq!(stats.live_objects, 0);
}

#[test]
fn test_failed_copy_waits_for_queued_slices() {
    let engine = engine_with(EngineConfig::default().max_linear_size(64 * 1024));
    let roi = Roi::new(256, 256);
    let s = surface(&engine, 1, Format::Rgb4, 256, 256);
    let data: Vec<u8> = (0..256 * 4 * 256).map(pattern(13)).collect();
    engine.device().load_surface(s, &data).unwrap();

    // four 64-row slices; the third enqueue fails
    let mut dst = HostFrame::at_page_offset(Format::Rgb4, roi, HostLayout::default(), 0).unwrap();
    let layout = dst.layout();
    engine.device().faults().pause_queue(true);
    engine.device().faults().fail_enqueue_after(Some(2));
    let resumed = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(100));
            resumed.store(true, Ordering::SeqCst);
            engine.device().faults().pause_queue(false);
        });

        let err = unsafe { engine.copy_device_to_host(dst.as_mut_ptr(), layout, s, roi, Format::Rgb4) }.unwrap_err();
        assert!(matches!(err, CopyError::DeviceOperationFailed(_)));
        assert!(resumed.load(Ordering::SeqCst), "returned while slices were still queued");

        // both queued slices landed before the error came back, nothing after
        for y in 0..128 {
            assert_eq!(dst.row(y), &data[y * 1024..(y + 1) * 1024], "row {y}");
        }
        assert!(dst.row(128).iter().all(|&b| b == 0));
    });
    assert_eq!(engine.device().stats().dispatches, 2);
    assert_eq!(engine.device().stats().live_objects, 0);
}

#[test]
fn test_larger_region_on_cached_surface_is_rejected() {
    let engine = engine();
    let s = surface(&engine, 1, Format::Rgb4, 32, 32);
    let small = filled(Format::Rgb4, Roi::new(32, 32), HostLayout::default(), 1);
    upload(&engine, s, &small);
    assert_eq!(engine.cache_stats().surfaces, 1);

    let large = filled(Format::Rgb4, Roi::new(64, 64), HostLayout::default(), 2);
    let err = unsafe {
        engine.copy_host_to_device(s, large.as_ptr(), large.layout(), large.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::ResourceCreationFailed(_)));
    assert_eq!(engine.device().surface_bytes(s).unwrap(), small.as_bytes());

    // one row too tall, downloading this time
    let mut tall = HostFrame::new(Format::Rgb4, Roi::new(32, 33), HostLayout::default()).unwrap();
    let (layout, roi) = (tall.layout(), tall.roi());
    let err = unsafe { engine.copy_device_to_host(tall.as_mut_ptr(), layout, s, roi, Format::Rgb4) }.unwrap_err();
    assert!(matches!(err, CopyError::ResourceCreationFailed(_)));

    // and surface to surface
    let other = surface(&engine, 2, Format::Rgb4, 64, 64);
    let err = engine
        .copy_device_to_device(other, s, Roi::new(64, 64), Format::Rgb4)
        .unwrap_err();
    assert!(matches!(err, CopyError::ResourceCreationFailed(_)));

    // the cached surface still serves regions that fit
    upload(&engine, s, &small);
    let stats = engine.device().stats();
    assert_eq!(stats.surfaces_opened, 1);
    assert_eq!(stats.dispatches, 2);
}

#[test]
fn test_creation_failures() {
    let frame = filled(Format::Rgb4, Roi::new(32, 8), HostLayout::default(), 1);
    let engine = engine();
    let s = surface(&engine, 1, Format::Rgb4, 32, 8);

    engine.device().faults().fail_surface_open(true);
    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::ResourceCreationFailed(_)));
    assert!(engine.cache_stats().surfaces == 0);

    engine.device().faults().fail_surface_open(false);
    engine.device().faults().fail_buffer_creation(true);
    let err = unsafe {
        engine.copy_host_to_device(s, frame.as_ptr(), frame.layout(), frame.roi(), Format::Rgb4)
    }
    .unwrap_err();
    assert!(matches!(err, CopyError::ResourceCreationFailed(_)));
    let cache = engine.cache_stats();
    assert_eq!((cache.buffers, cache.surfaces), (0, 1));

    // recovers once the device does
    engine.device().faults().fail_buffer_creation(false);
    upload(&engine, s, &frame);
}

#[test]
fn test_concurrent_callers() {
    let engine = engine();
    let roi = Roi::new(128, 64);
    let handles: Vec<_> = (0..4)
        .map(|i| surface(&engine, 100 + i, Format::Nv12, 128, 64))
        .collect();

    // all frames stay alive so no two share a host address
    let sources: Vec<HostFrame> = (0..4)
        .map(|i| filled(Format::Nv12, roi, HostLayout::default(), 20 + i))
        .collect();
    let mut sinks: Vec<HostFrame> = (0..4)
        .map(|_| HostFrame::new(Format::Nv12, roi, HostLayout::default()).unwrap())
        .collect();

    std::thread::scope(|scope| {
        for ((&s, src), dst) in handles.iter().zip(&sources).zip(sinks.iter_mut()) {
            let engine = &engine;
            scope.spawn(move || {
                for _ in 0..5 {
                    upload(engine, s, src);
                    download(engine, dst, s);
                    assert_rows_eq(src, dst);
                }
            });
        }
    });

    let stats = engine.device().stats();
    assert_eq!(stats.surfaces_opened, 4);
    assert_eq!(stats.buffers_created, 8);
    assert_eq!(stats.dispatches, 40);
    assert_eq!(stats.live_objects, 0);
}

#[test]
fn test_concurrent_first_use_of_one_surface() {
    let engine = engine();
    let s = surface(&engine, 1, Format::Rgb4, 64, 64);
    let frames: Vec<HostFrame> = (0..8)
        .map(|i| filled(Format::Rgb4, Roi::new(64, 64), HostLayout::default(), i))
        .collect();

    std::thread::scope(|scope| {
        for frame in &frames {
            let engine = &engine;
            scope.spawn(move || upload(engine, s, frame));
        }
    });
    assert_eq!(engine.device().stats().surfaces_opened, 1);
}
