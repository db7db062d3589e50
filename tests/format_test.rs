use std::fs;

use lbmgen::solver::native::{Generator, TemplateError};
use lbmgen::solver::GeneratorConfig;

fn default_generator() -> Generator {
    GeneratorConfig::default().build().unwrap()
}

#[test]
fn format_writes_a_complete_extension() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = default_generator();
    let buffers = generator.generate().unwrap();
    let written = generator.format(&buffers, tmp.path()).unwrap();
    assert_eq!(written.len(), 4);

    let name = generator.name();
    let package = tmp.path().join(format!("lettuce_native_{name}"));
    for path in [
        tmp.path().join("lettuce_native.cu"),
        tmp.path().join("lettuce_native.cpp"),
        tmp.path().join("setup.py"),
        package.join("__init__.py"),
    ] {
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("{{"), "{} has unfilled placeholders", path.display());
    }

    let cu = fs::read_to_string(tmp.path().join("lettuce_native.cu")).unwrap();
    assert!(cu.contains(&format!("lettuce_cuda_{name}_kernel(const scalar_t* f, ")));
    assert!(cu.contains("__constant__ index_t opposite[q]"));

    let cpp = fs::read_to_string(tmp.path().join("lettuce_native.cpp")).unwrap();
    assert!(cpp.contains(&format!("lettuce_cuda_{name}(f, no_collision_mask, tau_inv, f_next);")));
    for tensor in ["f", "no_collision_mask", "f_next"] {
        assert!(cpp.contains(&format!("    CHECK_INPUT({tensor});\n")), "{tensor} unchecked");
    }
    assert!(!cpp.contains("CHECK_INPUT(tau_inv)"));

    let init = fs::read_to_string(package.join("__init__.py")).unwrap();
    assert!(init.contains("    assert hasattr(simulation, 'f_next')\n"));
    assert!(init.contains(
        "    native.invoke(simulation.f, simulation.no_collision_mask, 1.0 / simulation.collision.tau, simulation.f_next)\n"
    ));
    assert!(init.contains("    simulation.f, simulation.f_next = simulation.f_next, simulation.f\n"));
}

#[test]
fn unchanged_files_are_not_rewritten() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = default_generator();
    let buffers = generator.generate().unwrap();
    let written = generator.format(&buffers, tmp.path()).unwrap();
    let stamps: Vec<_> = written
        .iter()
        .map(|path| fs::metadata(path).unwrap().modified().unwrap())
        .collect();
    generator.format(&buffers, tmp.path()).unwrap();
    for (path, stamp) in written.iter().zip(stamps) {
        assert_eq!(fs::metadata(path).unwrap().modified().unwrap(), stamp);
    }
}

#[test]
fn format_rejects_a_file_target() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("plain");
    fs::write(&file, "x").unwrap();
    let generator = default_generator();
    let buffers = generator.generate().unwrap();
    assert!(matches!(
        generator.format(&buffers, &file),
        Err(TemplateError::NotADirectory(ref path)) if *path == file
    ));
}

#[test]
fn missing_and_extra_buffers_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = default_generator();

    let mut buffers = generator.generate().unwrap();
    buffers.shift_remove("write");
    assert!(matches!(
        generator.format(&buffers, tmp.path()),
        Err(TemplateError::MissingBuffer { ref placeholder, .. }) if placeholder == "write"
    ));

    let mut buffers = generator.generate().unwrap();
    buffers.insert("extra".to_string(), String::new());
    assert!(matches!(
        generator.format(&buffers, tmp.path()),
        Err(TemplateError::UnusedBuffer(ref name)) if name == "extra"
    ));
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}
