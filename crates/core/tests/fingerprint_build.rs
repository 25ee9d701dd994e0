use namecarry_core::analysis::{
    BuildSession, CancelToken, Depth, FingerprintBuilder, MatchError, StringCatalog,
};
use namecarry_core::build_fingerprints;
use namecarry_core::config::MatchConfig;
use namecarry_core::model::Direction;
use namecarry_core::services::backends::{ExportedImage, ImageExport, InstructionRecord};
use namecarry_core::services::image::{FunctionInfo, ImageError, ImageView, XrefKind};

fn image(export: &ImageExport) -> ExportedImage {
    ExportedImage::from_export(export.clone()).expect("valid export")
}

fn function(image: &ExportedImage, name: &str) -> FunctionInfo {
    image.functions().into_iter().find(|f| f.name == name).expect("function present")
}

/// `foo` is called from ten functions, each loading its own string right before the call.
fn ten_callers() -> ImageExport {
    let mut export = ImageExport::new("callers");
    export.function("foo", 0x100, 0x110).instruction(0x100, "addiu").instruction(0x104, "jr");
    for i in 0..10u64 {
        let base = 0x1000 + i * 0x100;
        let string = 0x9000 + i * 0x20;
        export
            .function(format!("caller_{i}"), base, base + 0x10)
            .instruction(base, "lui")
            .string(string, format!("calling foo step {i}"))
            .string_ref(base + 4, string)
            .call(base + 8, 0x100)
            .instruction(base + 0xC, "jr");
    }
    export
}

#[test]
fn uniqueness_needs_one_reference_and_one_copy() {
    let mut export = ImageExport::new("strings");
    export
        .function("a", 0x100, 0x200)
        .string(0x9000, "only once")
        .string(0x9010, "referenced twice")
        .string(0x9020, "copied")
        .string(0x9030, "copied")
        .string(0x9040, "never referenced")
        .string_ref(0x100, 0x9000)
        .string_ref(0x104, 0x9010)
        .string_ref(0x108, 0x9010)
        .string_ref(0x10C, 0x9020)
        .string_ref(0x110, 0x9030);
    let image = image(&export);
    let catalog = StringCatalog::build(&image);

    assert!(catalog.is_unique_reference(0x9000));
    assert!(!catalog.is_unique_reference(0x9010));
    assert!(!catalog.is_unique_reference(0x9020));
    assert!(!catalog.is_unique_reference(0x9030));
    assert!(!catalog.is_unique_reference(0x9040));
    assert_eq!(catalog.unique_address_of("only once"), Some(0x9000));
    assert_eq!(catalog.unique_address_of("copied"), None);
    assert_eq!(catalog.count_of("copied"), 2);
}

#[test]
fn interior_strings_keep_instruction_order() {
    let mut export = ImageExport::new("interior");
    export
        .function("a", 0x100, 0x120)
        .string(0x9000, "second")
        .string(0x9010, "first")
        .string(0x9020, "shared")
        .string_ref(0x100, 0x9010)
        .string_ref(0x104, 0x9000)
        .string_ref(0x108, 0x9020)
        .function("b", 0x200, 0x210)
        .string_ref(0x200, 0x9020);
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "a"), true).expect("build");
    let texts: Vec<(&str, bool)> =
        fp.interior_strings.iter().map(|s| (s.text.as_str(), s.unique)).collect();
    assert_eq!(texts, vec![("first", true), ("second", true), ("shared", false)]);
}

#[test]
fn build_is_idempotent() {
    let export = ten_callers();
    let image = image(&export);
    let config = MatchConfig::default();

    let mut builder = FingerprintBuilder::new(&image, &config);
    let foo = function(&image, "foo");
    let first = builder.build(&foo, true).expect("first build");
    let cached = builder.build(&foo, true).expect("cached build");
    assert_eq!(first, cached);
    assert_eq!(builder.cache().len(Depth::Full), 1);

    let mut fresh = FingerprintBuilder::new(&image, &config);
    assert_eq!(fresh.build(&foo, true).expect("fresh build"), first);
}

#[test]
fn call_site_scan_stops_after_enough_unique_calling_strings() {
    let export = ten_callers();
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "foo"), true).expect("build");
    assert_eq!(fp.calling_strings.len(), 5);
    for (i, s) in fp.calling_strings.iter().enumerate() {
        assert_eq!(s.text, format!("calling foo step {i}"));
        assert!(s.unique);
        assert_eq!(s.direction, Direction::Backward);
    }
    assert!(fp.fallback_callees.is_empty());
}

#[test]
fn calling_string_after_the_call_is_forward() {
    let mut export = ImageExport::new("forward");
    export
        .function("target", 0x100, 0x110)
        .instruction(0x100, "jr")
        .function("caller", 0x200, 0x220)
        .instruction(0x200, "lui")
        .call(0x204, 0x100)
        .string(0x9000, "after the call")
        .string_ref(0x208, 0x9000)
        .string(0x9010, "past the jump")
        .instruction(0x20C, "b")
        .string_ref(0x210, 0x9010);
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "target"), true).expect("build");
    assert_eq!(fp.calling_strings.len(), 1);
    assert_eq!(fp.calling_strings[0].text, "after the call");
    assert_eq!(fp.calling_strings[0].direction, Direction::Forward);
}

#[test]
fn scan_stops_at_the_function_boundary() {
    let mut export = ImageExport::new("bounds");
    export
        .function("target", 0x100, 0x110)
        .instruction(0x100, "jr")
        .function("neighbour", 0x1F0, 0x200)
        .string(0x9000, "belongs to neighbour")
        .string_ref(0x1FC, 0x9000)
        .function("caller", 0x200, 0x210)
        .call(0x200, 0x100)
        .instruction(0x204, "jr");
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "target"), true).expect("build");
    assert!(fp.calling_strings.is_empty());
}

#[test]
fn fallback_callees_are_shallow() {
    let mut export = ImageExport::new("chain");
    export
        .function("a", 0x100, 0x110)
        .call(0x100, 0x200)
        .function("b", 0x200, 0x210)
        .call(0x200, 0x300)
        .function("c", 0x300, 0x310)
        .instruction(0x300, "jr");
    let image = image(&export);
    let fingerprints = build_fingerprints(&image, &MatchConfig::default()).expect("build");

    let a = fingerprints.iter().find(|f| f.name == "a").expect("a");
    assert_eq!(a.fallback_callees.len(), 1);
    assert_eq!(a.fallback_callees[0].name, "b");
    for fp in &fingerprints {
        for callee in &fp.fallback_callees {
            assert!(callee.fallback_callees.is_empty(), "{} nests callees", callee.name);
        }
    }
    let b = fingerprints.iter().find(|f| f.name == "b").expect("b");
    assert_eq!(b.fallback_callees[0].name, "c");
}

#[test]
fn fallback_callees_are_deduplicated_and_capped() {
    let mut export = ImageExport::new("hub");
    export.function("hub", 0x100, 0x200);
    for i in 0..12u64 {
        export.call(0x100 + i * 4, 0x1000 + i * 0x10);
        export.function(format!("leaf_{i}"), 0x1000 + i * 0x10, 0x1010 + i * 0x10);
    }
    export.call(0x140, 0x1000);
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "hub"), true).expect("build");
    let names: Vec<&str> = fp.fallback_callees.iter().map(|c| c.name.as_str()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("leaf_{i}")).collect();
    assert_eq!(names, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

#[test]
fn strong_evidence_skips_fallback() {
    let mut export = ImageExport::new("strong");
    export
        .function("a", 0x100, 0x110)
        .string(0x9000, "one")
        .string(0x9010, "two")
        .string_ref(0x100, 0x9000)
        .string_ref(0x104, 0x9010)
        .call(0x108, 0x200)
        .function("b", 0x200, 0x210);
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "a"), true).expect("build");
    assert_eq!(fp.unique_interior_count(), 2);
    assert!(fp.fallback_callees.is_empty());
}

#[test]
fn unique_interior_strings_stop_the_call_site_scan() {
    let mut export = ImageExport::new("interior stop");
    export
        .function("a", 0x100, 0x110)
        .string(0x9000, "one")
        .string(0x9010, "two")
        .string_ref(0x100, 0x9000)
        .string_ref(0x104, 0x9010)
        .instruction(0x108, "jr");
    for i in 0..3u64 {
        let base = 0x1000 + i * 0x100;
        let string = 0x9100 + i * 0x20;
        export
            .function(format!("user_{i}"), base, base + 0x10)
            .instruction(base, "lui")
            .string(string, format!("calling a from {i}"))
            .string_ref(base + 4, string)
            .call(base + 8, 0x100)
            .instruction(base + 0xC, "jr");
    }
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "a"), true).expect("build");
    assert_eq!(fp.unique_interior_count(), 2);
    let texts: Vec<&str> = fp.calling_strings.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["calling a from 0"]);
}

#[test]
fn calling_string_scan_ends_at_the_next_x86_call() {
    let mut export = ImageExport::new("x86");
    export
        .function("caller", 0x100, 0x120)
        .instruction(0x100, "push")
        .string(0x9000, "belongs to other")
        .instruction(0x10B, "lea")
        .xref(0x10B, 0x9000, XrefKind::Data)
        .instruction(0x112, "ret")
        .function("foo", 0x300, 0x310)
        .instruction(0x300, "ret")
        .function("other", 0x400, 0x410)
        .instruction(0x400, "ret");
    for (site, to) in [(0x101, 0x300), (0x106, 0x400)] {
        export.instructions.push(InstructionRecord {
            address: site,
            mnemonic: "call".into(),
            is_call: true,
        });
        export.xref(site, to, XrefKind::Call);
    }
    let image = image(&export);
    let config = MatchConfig::default();
    let mut builder = FingerprintBuilder::new(&image, &config);

    let foo = builder.build(&function(&image, "foo"), true).expect("build foo");
    assert!(foo.calling_strings.is_empty(), "unexpected: {:?}", foo.calling_strings);

    let other = builder.build(&function(&image, "other"), true).expect("build other");
    assert_eq!(other.calling_strings.len(), 1);
    assert_eq!(other.calling_strings[0].text, "belongs to other");
    assert_eq!(other.calling_strings[0].direction, Direction::Forward);
}

#[test]
fn default_and_duplicate_names_are_skipped() {
    let mut export = ImageExport::new("names");
    export
        .function("sub_401000", 0x100, 0x110)
        .function("nullsub_3", 0x110, 0x120)
        .function("def_4011F0", 0x120, 0x130)
        .function("start", 0x130, 0x140)
        .function("real_name", 0x140, 0x150)
        .function("real_name", 0x150, 0x160)
        .function("startup", 0x160, 0x170);
    let image = image(&export);

    let fingerprints = build_fingerprints(&image, &MatchConfig::default()).expect("build");
    let names: Vec<&str> = fingerprints.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["real_name", "startup"]);
    assert_eq!(fingerprints[0].range.start, 0x140);
}

#[test]
fn call_from_outside_any_function_aborts_the_build() {
    let mut export = ImageExport::new("broken");
    export.function("foo", 0x100, 0x110).instruction(0x100, "jr").call(0x5000, 0x100);
    let image = image(&export);

    let err = build_fingerprints(&image, &MatchConfig::default()).unwrap_err();
    assert!(matches!(err, MatchError::Backend(ImageError::MissingFunction(0x5000))));
}

#[test]
fn cancelled_build_reports_progress() {
    let export = ten_callers();
    let image = image(&export);
    let config = MatchConfig::default();
    let token = CancelToken::new();
    token.cancel();

    let err = BuildSession::new(&image, &config).with_cancel(token).run().unwrap_err();
    match err {
        MatchError::Cancelled { completed, total } => {
            assert_eq!(completed, 0);
            assert_eq!(total, 11);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn tighter_config_changes_thresholds() {
    let export = ten_callers();
    let image = image(&export);
    let config = MatchConfig { max_unique_calling_strings: 2, ..MatchConfig::default() };
    let mut builder = FingerprintBuilder::new(&image, &config);

    let fp = builder.build(&function(&image, "foo"), true).expect("build");
    assert_eq!(fp.calling_strings.len(), 2);
}
