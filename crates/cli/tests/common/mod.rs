use std::path::{Path, PathBuf};

use namecarry_core::services::backends::ImageExport;

/// Writes a named source export and a relinked, stripped target export into `dir`.
///
/// `foo` moves to 0x3000 (unique string), `logged` to 0x4000 (calling strings) and `bar` to
/// 0x7000 (call graph through `baz` at 0x6000).
pub fn write_images(dir: &Path) -> (PathBuf, PathBuf) {
    let mut source = ImageExport::new("v1");
    source
        .function("foo", 0x100, 0x120)
        .instruction(0x100, "lui")
        .string(0x9000, "ERR_INIT_FAILED")
        .string_ref(0x104, 0x9000)
        .instruction(0x108, "jr")
        .function("logged", 0x200, 0x210)
        .instruction(0x200, "jr")
        .function("first_user", 0x300, 0x310)
        .instruction(0x300, "lui")
        .string(0x9100, "calling foo: %d")
        .string_ref(0x304, 0x9100)
        .call(0x308, 0x200)
        .instruction(0x30C, "jr")
        .function("second_user", 0x400, 0x410)
        .instruction(0x400, "lui")
        .string(0x9200, "calling foo again: %d")
        .string_ref(0x404, 0x9200)
        .call(0x408, 0x200)
        .instruction(0x40C, "jr")
        .function("bar", 0x500, 0x510)
        .instruction(0x500, "lui")
        .call(0x504, 0x600)
        .instruction(0x508, "jr")
        .function("baz", 0x600, 0x610)
        .string(0x9300, "baz only string")
        .string_ref(0x600, 0x9300)
        .instruction(0x604, "jr")
        .function("sub_800", 0x800, 0x810)
        .instruction(0x800, "jr");

    let mut target = ImageExport::new("v2");
    target
        .function("sub_3000", 0x3000, 0x3020)
        .instruction(0x3000, "lui")
        .string(0xA000, "ERR_INIT_FAILED")
        .string_ref(0x3004, 0xA000)
        .instruction(0x3008, "jr")
        .function("sub_4000", 0x4000, 0x4010)
        .instruction(0x4000, "jr")
        .function("sub_5000", 0x5000, 0x5010)
        .instruction(0x5000, "lui")
        .string(0xA100, "calling foo: %d")
        .string_ref(0x5004, 0xA100)
        .call(0x5008, 0x4000)
        .instruction(0x500C, "jr")
        .function("sub_5100", 0x5100, 0x5110)
        .instruction(0x5100, "lui")
        .string(0xA200, "calling foo again: %d")
        .string_ref(0x5104, 0xA200)
        .call(0x5108, 0x4000)
        .instruction(0x510C, "jr")
        .function("sub_6000", 0x6000, 0x6010)
        .string(0xA300, "baz only string")
        .string_ref(0x6000, 0xA300)
        .instruction(0x6004, "jr")
        .function("sub_7000", 0x7000, 0x7010)
        .instruction(0x7000, "lui")
        .call(0x7004, 0x6000)
        .instruction(0x7008, "jr");

    let source_path = dir.join("v1.json");
    let target_path = dir.join("v2.yaml");
    source.write(&source_path).expect("write source export");
    target.write(&target_path).expect("write target export");
    (source_path, target_path)
}
