//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use gpucopy_core::{Format, HostLayout, Roi, SurfaceHandle};
use gpucopy_engine::{CopyEngine, EngineConfig, HostFrame, SoftDevice};

/// Installs a test-friendly subscriber once; `RUST_LOG` selects the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> CopyEngine<SoftDevice> {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> CopyEngine<SoftDevice> {
    init_logging();
    CopyEngine::initialize(SoftDevice::new().unwrap(), config).unwrap()
}

/// Registers a zeroed surface on the engine's device.
pub fn surface(engine: &CopyEngine<SoftDevice>, id: u64, format: Format, width: u32, height: u32) -> SurfaceHandle {
    let handle = SurfaceHandle::new(id, 0);
    engine.device().allocate_surface(handle, format, width, height).unwrap();
    handle
}

/// Deterministic non-trivial byte pattern.
pub fn pattern(seed: usize) -> impl Fn(usize) -> u8 {
    move |i| (i.wrapping_mul(31).wrapping_add(seed * 7 + 3) % 251) as u8
}

pub fn filled(format: Format, roi: Roi, layout: HostLayout, seed: usize) -> HostFrame {
    let mut frame = HostFrame::new(format, roi, layout).unwrap();
    frame.fill_with(pattern(seed));
    frame
}

/// Uploads `frame` into `surface` with the frame's own layout.
pub fn upload(engine: &CopyEngine<SoftDevice>, surface: SurfaceHandle, frame: &HostFrame) {
    unsafe {
        engine
            .copy_host_to_device(surface, frame.as_ptr(), frame.layout(), frame.roi(), frame.format())
            .unwrap();
    }
}

/// Downloads `surface` into `frame` with the frame's own layout.
pub fn download(engine: &CopyEngine<SoftDevice>, frame: &mut HostFrame, surface: SurfaceHandle) {
    let (layout, roi, format) = (frame.layout(), frame.roi(), frame.format());
    unsafe {
        engine
            .copy_device_to_host(frame.as_mut_ptr(), layout, surface, roi, format)
            .unwrap();
    }
}

/// Asserts that the copied rows (and chroma rows) of two frames match.
pub fn assert_rows_eq(a: &HostFrame, b: &HostFrame) {
    let roi = a.roi();
    for y in 0..roi.height as usize {
        assert_eq!(a.row(y), b.row(y), "luma row {y}");
    }
    if gpucopy_core::is_semi_planar_like(a.format()) {
        for c in 0..roi.height as usize / 2 {
            assert_eq!(a.chroma_row(c), b.chroma_row(c), "chroma row {c}");
        }
    }
}
