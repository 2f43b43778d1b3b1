use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use weii_core::DisplayUnit;
use weii_session::{Config, ConfigError, LinkConfig, SessionConfig};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_full_configuration() -> color_eyre::Result<()> {
    let file = write_config(
        r#"
[session]
sample_count = 120
min_limit_kg = 15.0
debounce_ms = 250
tolerance = 0.03

[link]
type = "device"
path = "/dev/rfcomm0"

[output]
unit = "lbs"
adjust_kg = -1.5
command = "echo {weight}"
disconnect_address = "00:1F:32:AB:CD:09"
"#,
    );

    let config = Config::load(file.path())?;

    assert_eq!(config.session.sample_count, 120);
    assert_eq!(config.session.min_limit_kg, 15.0);
    assert_eq!(config.session.debounce_ms, 250);
    assert_eq!(config.session.tolerance, 0.03);
    // untouched keys keep their defaults
    assert_eq!(config.session.grace_rejections, 25);
    assert!(config.session.validate().is_ok());

    match config.link {
        LinkConfig::Device { path, hidraw } => {
            assert_eq!(path, PathBuf::from("/dev/rfcomm0"));
            assert!(!hidraw);
        }
        other => panic!("unexpected link {other:?}"),
    }

    assert_eq!(config.output.unit, DisplayUnit::Lb);
    assert_eq!(config.output.adjust_kg, -1.5);
    assert_eq!(config.output.command.as_deref(), Some("echo {weight}"));
    assert!(!config.output.weight_only);

    Ok(())
}

#[test]
fn empty_file_uses_defaults() -> color_eyre::Result<()> {
    let file = write_config("");
    let config = Config::load(file.path())?;

    assert_eq!(config.session.sample_count, 200);
    assert_eq!(config.session.min_limit_kg, 20.0);
    assert_eq!(config.output.unit, DisplayUnit::Kg);
    assert!(matches!(
        config.link,
        LinkConfig::Device { hidraw: true, .. }
    ));

    Ok(())
}

#[test]
fn loads_mock_link() -> color_eyre::Result<()> {
    let file = write_config(
        r#"
[link]
type = "mock"
weight_kg = 70.0
step_on_after_ms = 1000
report_interval_ms = 10
noise_kg = 0.1
"#,
    );

    let config = Config::load(file.path())?;

    match config.link {
        LinkConfig::Mock {
            weight_kg, seed, ..
        } => {
            assert_eq!(weight_kg, 70.0);
            assert_eq!(seed, None);
        }
        other => panic!("unexpected link {other:?}"),
    }

    Ok(())
}

#[test]
fn unknown_unit_fails_to_load() {
    let file = write_config("[output]\nunit = \"stone\"\n");
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn validation_rejects_bad_values() {
    let cases = [
        (
            SessionConfig {
                sample_count: 0,
                ..Default::default()
            },
            ConfigError::ZeroSampleCount,
        ),
        (
            SessionConfig {
                min_limit_kg: -1.0,
                ..Default::default()
            },
            ConfigError::InvalidMinLimit(-1.0),
        ),
        (
            SessionConfig {
                tolerance: -0.1,
                ..Default::default()
            },
            ConfigError::InvalidTolerance(-0.1),
        ),
        (
            SessionConfig {
                grace_rejections: 0,
                ..Default::default()
            },
            ConfigError::ZeroGraceRejections,
        ),
        (
            SessionConfig {
                max_decode_errors: 0,
                ..Default::default()
            },
            ConfigError::ZeroDecodeErrors,
        ),
    ];

    for (config, expected) in cases {
        assert_eq!(config.validate(), Err(expected));
    }

    assert!(matches!(
        SessionConfig {
            tolerance: f64::NAN,
            ..Default::default()
        }
        .validate(),
        Err(ConfigError::InvalidTolerance(_))
    ));
}
