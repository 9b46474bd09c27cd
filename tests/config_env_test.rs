use ocrdrop::Settings;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_env_overrides_nested_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        r#"
[watch]
follow_links = false
stabilize_retries = 7

[recognition]
languages = ["deu"]
"#,
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("OCRDROP_WATCH__FOLLOW_LINKS", "true");
        env::set_var("OCRDROP_RECOGNITION__TEXT_MIN_CHARS", "64");
        env::set_var("OCRDROP_PATHS__WATCH_ROOT", "/srv/scans/in");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("OCRDROP_WATCH__FOLLOW_LINKS");
        env::remove_var("OCRDROP_RECOGNITION__TEXT_MIN_CHARS");
        env::remove_var("OCRDROP_PATHS__WATCH_ROOT");
    }

    // Environment wins over the file
    assert!(settings.watch.follow_links);
    assert_eq!(settings.recognition.text_min_chars, 64);
    assert_eq!(
        settings.paths.watch_root,
        Some(PathBuf::from("/srv/scans/in"))
    );

    // File wins over defaults
    assert_eq!(settings.watch.stabilize_retries, 7);
    assert_eq!(settings.recognition.languages, vec!["deu".to_string()]);

    // Untouched settings keep their defaults
    assert_eq!(settings.recognition.dpi, 300);
    assert!(settings.output.text && settings.output.pdf);
}
