use imgplug::plugins::pnm::PnmKind;
use imgplug::registry::MruList;
use imgplug::{
    fif, Bitmap, Capabilities, FormatId, ImageType, LoadFlags, Plugin, PluginError,
    PluginRegistry, ReadSeek, Registration, SaveFlags,
};
use proptest::prelude::*;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::{tempdir, NamedTempFile};

// ── Test plugins ─────────────────────────────────────────────────────────────

/// Accepts streams that start with `magic`; counts its calls.
struct Magic {
    name:  &'static str,
    magic: &'static [u8],
    calls: Arc<AtomicUsize>,
}

impl Plugin for Magic {
    fn capabilities(&self) -> Capabilities {
        Capabilities::VALIDATE | Capabilities::SAVE
    }

    fn format(&self) -> Option<&str> {
        Some(self.name)
    }

    fn validate(&self, io: &mut dyn ReadSeek) -> io::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut buf = vec![0u8; self.magic.len()];
        let n = io.read(&mut buf)?;
        Ok(n == buf.len() && buf == self.magic)
    }

    fn save(
        &self,
        _io:     &mut dyn imgplug::WriteSeek,
        _bitmap: &Bitmap,
        _page:   i32,
        _flags:  SaveFlags,
        _state:  Option<&mut imgplug::CodecState>,
    ) -> imgplug::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn add_magic(reg: &PluginRegistry, name: &'static str, magic: &'static [u8]) -> (FormatId, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let id = reg
        .register(
            Some(move |_: FormatId| Box::new(Magic { name, magic, calls: counter }) as Box<dyn Plugin>),
            None,
            Registration::new(),
        )
        .unwrap();
    (id, calls)
}

fn mru_ids(reg: &PluginRegistry) -> Vec<FormatId> {
    reg.mru_order().iter().map(|i| i.format).collect()
}

// ── Detection scenarios ──────────────────────────────────────────────────────

#[test]
fn only_matching_format_is_detected_and_promoted() {
    let reg = PluginRegistry::new();
    let (a, _) = add_magic(&reg, "A", b"AAAA");
    let (b, _) = add_magic(&reg, "B", b"BBBB");
    let (c, _) = add_magic(&reg, "C", b"CCCC");
    let before = mru_ids(&reg).iter().position(|&id| id == c).unwrap();

    let mut stream = Cursor::new(b"CCCC rest".to_vec());
    assert_eq!(reg.detect(&mut stream), Some(c));
    assert_eq!(stream.position(), 0);

    let order = reg.mru_order();
    let after = order.iter().position(|i| i.format == c).unwrap();
    assert!(after <= before);
    assert_eq!(order[after].weight, 1);
    assert!(order.iter().filter(|i| i.format != c).all(|i| i.weight == 0));
    assert!([a, b].iter().all(|id| order.iter().any(|i| i.format == *id)));
}

#[test]
fn raw_wins_over_tiff_when_both_validate() {
    let reg = PluginRegistry::new();
    let (_, _) = add_magic(&reg, "PNG", b"\x89PNG");
    let (tiff, _) = add_magic(&reg, "TIFF", b"II*\0");
    let (raw, _) = add_magic(&reg, "RAW", b"II*\0");

    let mut stream = Cursor::new(b"II*\0\x08\0\0\0".to_vec());
    assert_eq!(reg.detect(&mut stream), Some(raw));
    assert_eq!(stream.position(), 0);

    reg.set_enabled(raw, false).unwrap();
    assert_eq!(reg.detect(&mut stream), Some(tiff));
}

#[test]
fn no_match_leaves_mru_untouched() {
    let reg = PluginRegistry::new();
    add_magic(&reg, "A", b"AAAA");
    add_magic(&reg, "B", b"BBBB");
    let before = reg.mru_order();

    assert_eq!(reg.detect_from_memory(b"ZZZZZZ"), None);
    assert_eq!(reg.detect_from_memory(b""), None);
    assert_eq!(reg.mru_order(), before);
}

#[test]
fn header_only_save_calls_nothing() {
    let reg = PluginRegistry::new();
    let (id, calls) = add_magic(&reg, "A", b"AAAA");
    let b = Bitmap::header_only(ImageType::Bitmap, 4, 4, 24);

    let err = reg.save_to_memory(id, &b, SaveFlags::DEFAULT).unwrap_err();
    assert!(matches!(err, PluginError::HeaderOnly));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    reg.save_to_memory(id, &Bitmap::new(ImageType::Bitmap, 1, 1, 24), SaveFlags::DEFAULT).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn disabled_format_is_never_detected() {
    let reg = PluginRegistry::new();
    let (a, calls) = add_magic(&reg, "A", b"AAAA");
    reg.set_enabled(a, false).unwrap();
    assert_eq!(reg.detect_from_memory(b"AAAA"), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    reg.set_enabled(a, true).unwrap();
    assert_eq!(reg.detect_from_memory(b"AAAA"), Some(a));
}

#[test]
fn concurrent_register_and_detect_stay_consistent() {
    let reg = Arc::new(PluginRegistry::new());
    add_magic(&reg, "SEED", b"SEED");

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for i in 0..25 {
                    let name: &'static str = Box::leak(format!("W{t}_{i}").into_boxed_str());
                    add_magic(&reg, name, b"NEVER");
                    assert!(reg.check_consistency());
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..50 {
                    assert_eq!(reg.detect_from_memory(b"SEED"), Some(FormatId(0)));
                    assert!(reg.check_consistency());
                }
            })
        })
        .collect();

    for h in writers.into_iter().chain(readers) {
        h.join().unwrap();
    }
    assert_eq!(reg.len(), 101);
    assert!(reg.check_consistency());

    let mut ids: Vec<i32> = reg.entries().iter().map(|(e, _)| e.id().0).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..101).collect::<Vec<_>>());
}

#[test]
fn validate_may_reenter_the_registry() {
    struct Reentrant(Arc<PluginRegistry>);
    impl Plugin for Reentrant {
        fn capabilities(&self) -> Capabilities {
            Capabilities::VALIDATE
        }
        fn format(&self) -> Option<&str> {
            Some("REENTRANT")
        }
        fn validate(&self, io: &mut dyn ReadSeek) -> io::Result<bool> {
            // Same thread, lock already held by detect.
            let _ = self.0.len();
            let _ = self.0.find_by_format("REENTRANT");
            let mut b = [0u8; 1];
            Ok(io.read(&mut b)? == 1 && b[0] == b'R')
        }
    }

    let reg = Arc::new(PluginRegistry::new());
    let inner = Arc::clone(&reg);
    let id = reg
        .register(
            Some(move |_: FormatId| Box::new(Reentrant(inner)) as Box<dyn Plugin>),
            None,
            Registration::new(),
        )
        .unwrap();
    assert_eq!(reg.detect_from_memory(b"R"), Some(id));
}

// ── Built-in codecs through the registry ─────────────────────────────────────

fn gradient(width: u32, height: u32, bpp: u32) -> Bitmap {
    let mut b = Bitmap::new(ImageType::Bitmap, width, height, bpp);
    for (i, px) in b.pixels_mut().unwrap().iter_mut().enumerate() {
        *px = (i * 37 % 251) as u8;
    }
    b
}

fn round_trip(reg: &PluginRegistry, id: FormatId, bitmap: &Bitmap) -> Bitmap {
    let bytes = reg.save_to_memory(id, bitmap, SaveFlags::DEFAULT).unwrap();
    assert_eq!(reg.detect_from_memory(&bytes), Some(id), "format {id}");
    reg.load_from_memory(id, &bytes, LoadFlags::DEFAULT).unwrap()
}

#[test]
fn bmp_round_trip() {
    let reg = PluginRegistry::with_builtins();
    for bpp in [24, 32] {
        let b = gradient(5, 3, bpp);
        assert_eq!(round_trip(&reg, fif::BMP, &b), b);
    }
}

#[test]
fn pnm_round_trips() {
    let reg = PluginRegistry::with_builtins();

    // 10 pixels wide: the six tail bits of each row stay clear.
    let mut bilevel = Bitmap::new(ImageType::Bitmap, 10, 3, 1);
    for y in 0..3 {
        let row = bilevel.row_mut(y).unwrap();
        row[0] = 0b1010_0110 ^ y as u8;
        row[1] = 0b1000_0000;
    }

    for kind in PnmKind::ALL {
        let id = reg.find_by_format(kind.format_name()).unwrap().id();
        let b = match kind {
            PnmKind::Pbm | PnmKind::PbmRaw => bilevel.clone(),
            PnmKind::Pgm | PnmKind::PgmRaw => gradient(7, 4, 8),
            PnmKind::Ppm | PnmKind::PpmRaw => gradient(7, 4, 24),
        };
        assert_eq!(round_trip(&reg, id, &b), b, "{}", kind.format_name());
    }
}

#[test]
fn pfm_round_trip() {
    let reg = PluginRegistry::with_builtins();
    let mut b = Bitmap::new(ImageType::RgbF, 3, 2, 96);
    for (i, px) in b.pixels_mut().unwrap().chunks_exact_mut(4).enumerate() {
        px.copy_from_slice(&(i as f32 / 3.0 - 2.0).to_ne_bytes());
    }
    assert_eq!(round_trip(&reg, fif::PFM, &b), b);
}

#[test]
fn header_only_load_where_supported() {
    let reg = PluginRegistry::with_builtins();
    let bytes = reg.save_to_memory(fif::BMP, &gradient(4, 2, 24), SaveFlags::DEFAULT).unwrap();
    assert!(reg.supports_no_pixels(fif::BMP));
    let b = reg.load_from_memory(fif::BMP, &bytes, LoadFlags::NO_PIXELS).unwrap();
    assert!(!b.has_pixels());
    assert_eq!((b.width, b.height, b.bpp), (4, 2, 24));
}

#[test]
fn signature_only_formats_refuse_load() {
    let reg = PluginRegistry::with_builtins();
    let err = reg.load_from_memory(fif::GIF, b"GIF89a....", LoadFlags::DEFAULT).unwrap_err();
    assert!(matches!(err, PluginError::Unsupported { format, capability: "load" } if format == fif::GIF));
    assert!(matches!(
        reg.load_from_memory(FormatId(500), b"", LoadFlags::DEFAULT),
        Err(PluginError::UnknownFormat(FormatId(500)))
    ));
}

#[test]
fn builtin_detection_samples() {
    let reg = PluginRegistry::with_builtins();
    let cases: [(&[u8], FormatId); 8] = [
        (b"\xFF\xD8\xFF\xE0\0\x10JFIF", fif::JPEG),
        (b"GIF87a\x01\0\x01\0", fif::GIF),
        (b"8BPS\0\x01", fif::PSD),
        (b"MM\0*\0\0\0\x08", fif::TIFF),
        (b"IIRO\x08\0\0\0", fif::RAW),
        (b"RIFF\x10\0\0\0WEBPVP8 ", fif::WEBP),
        (b"P5\n1 1\n255\n\x80", fif::PGMRAW),
        (b"Pf\n1 1\n-1\n\0\0\0\0", fif::PFM),
    ];
    for (data, expect) in cases {
        assert_eq!(reg.detect_from_memory(data), Some(expect), "{expect}");
    }
}

// ── Paths ────────────────────────────────────────────────────────────────────

#[test]
fn path_round_trip_and_detection() {
    let reg = PluginRegistry::with_builtins();
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.ppm");
    let b = gradient(3, 3, 24);

    let id = reg.format_from_filename(&path.to_string_lossy()).unwrap();
    assert_eq!(id, fif::PPM);
    reg.save_to_path(id, &b, &path, SaveFlags::DEFAULT).unwrap();
    assert_eq!(reg.detect_from_path(&path), Some(fif::PPM));
    assert_eq!(reg.load_from_path(id, &path, LoadFlags::DEFAULT).unwrap(), b);
}

#[test]
fn unreadable_paths() {
    let reg = PluginRegistry::with_builtins();
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.bmp");
    assert_eq!(reg.detect_from_path(&missing), None);
    assert!(matches!(
        reg.load_from_path(fif::BMP, &missing, LoadFlags::DEFAULT),
        Err(PluginError::Io(_))
    ));

    let empty = NamedTempFile::new().unwrap();
    assert_eq!(reg.detect_from_path(empty.path()), None);
}

// ── Shared instance ──────────────────────────────────────────────────────────

#[test]
fn library_lifecycle() {
    let opts = imgplug::InitOptions { load_external_plugins: false, search_paths: Vec::new() };
    let reg = imgplug::initialise_with(opts.clone());
    assert_eq!(reg.len(), fif::COUNT);
    assert!(imgplug::library::registry().is_some());

    let again = imgplug::initialise_with(opts);
    assert!(Arc::ptr_eq(&reg, &again));
    assert_eq!(imgplug::deinitialise(), 1);
    assert_eq!(imgplug::library::format_count(), fif::COUNT);
    assert_eq!(imgplug::deinitialise(), 0);
    assert!(imgplug::library::registry().is_none());
}

// ── Properties ───────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn ids_are_dense_in_call_order(named in proptest::collection::vec(any::<bool>(), 0..24)) {
        let reg = PluginRegistry::new();
        let mut expected = 0;
        for has_name in named {
            let r = reg.register(
                Some(move |_: FormatId| {
                    Box::new(Magic {
                        name:  if has_name { "N" } else { "" },
                        magic: b"X",
                        calls: Arc::default(),
                    }) as Box<dyn Plugin>
                }),
                None,
                if has_name { Registration::new() } else { Registration::new().format("OVR") },
            );
            prop_assert_eq!(r.unwrap(), FormatId(expected));
            expected += 1;
        }
        prop_assert_eq!(reg.len(), expected as usize);
        prop_assert!(reg.check_consistency());
    }

    #[test]
    fn promotion_exchanges_at_most_once(n in 1i32..12, hits in proptest::collection::vec(0i32..16, 0..64)) {
        let mut mru = MruList::new();
        for i in 0..n {
            mru.push(FormatId(i));
        }
        for &h in &hits {
            let before = mru.as_slice().to_vec();
            let old_pos = mru.position(FormatId(h));
            mru.promote(FormatId(h));
            let after = mru.as_slice();

            let moved = before.iter().zip(after).filter(|(a, b)| a.format != b.format).count();
            prop_assert!(moved == 0 || moved == 2);
            if let Some(p) = old_pos {
                prop_assert!(mru.position(FormatId(h)).unwrap() <= p);
            } else {
                prop_assert_eq!(&before[..], after);
            }
        }
        let known_hits = hits.iter().filter(|&&h| h < n).count() as u32;
        prop_assert_eq!(mru.as_slice().iter().map(|i| i.weight).sum::<u32>(), known_hits);

        let mut ids: Vec<i32> = mru.as_slice().iter().map(|i| i.format.0).collect();
        ids.sort_unstable();
        prop_assert_eq!(ids, (0..n).collect::<Vec<_>>());
    }
}
