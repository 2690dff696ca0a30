use rec_exec::{ExecutionMode, Settings, SettingsError};

#[test]
fn test_defaults_round_trip() {
    let settings = Settings::default();
    assert_eq!(settings.execution_mode, ExecutionMode::Recompiler);
    assert!(settings.recompiler.check_downcount);
    let text = settings.to_toml_string().unwrap();
    assert!(text.contains("execution_mode = \"recompiler\""));
    assert_eq!(Settings::from_toml_str(&text).unwrap(), settings);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let settings = Settings::from_toml_str(
        r#"
        execution_mode = "cached-interpreter"

        [recompiler]
        disable_specialization = true
        "#,
    )
    .unwrap();
    assert_eq!(settings.execution_mode, ExecutionMode::CachedInterpreter);
    assert!(settings.recompiler.disable_specialization);
    assert!(settings.recompiler.check_downcount);
    assert_eq!(settings.ram_size, Settings::default().ram_size);

    let options = settings.compiler_options();
    assert!(options.check_downcount);
    assert!(options.disable_specialization);
}

#[test]
fn test_rejects_bad_values() {
    for text in [
        "ram_size = 3000",
        "ram_size = 1024",
        "ram_size = 16777216",
        "code_buffer_size = 4096",
        "max_block_instructions = 0",
    ] {
        assert!(
            matches!(Settings::from_toml_str(text), Err(SettingsError::Invalid(_))),
            "{text}"
        );
    }
}

#[test]
fn test_parse_errors() {
    assert!(matches!(
        Settings::from_toml_str("execution_mode = \"jit\""),
        Err(SettingsError::Parse(_))
    ));
    assert!(matches!(
        Settings::from_toml_str("ram_size = \"big\""),
        Err(SettingsError::Parse(_))
    ));
}

#[test]
fn test_load_from_file() {
    let dir = std::env::temp_dir().join(format!("rec-settings-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("settings.toml");
    std::fs::write(&path, "execution_mode = \"interpreter\"\nram_size = 65536\n").unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.execution_mode, ExecutionMode::Interpreter);
    assert_eq!(settings.ram_size, 65536);

    let missing = dir.join("missing.toml");
    match Settings::load(&missing) {
        Err(SettingsError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected Io error, got {other:?}"),
    }
    std::fs::remove_dir_all(&dir).unwrap();
}
