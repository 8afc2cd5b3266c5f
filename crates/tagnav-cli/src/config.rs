//! Parameter file – reads `tagnav.toml` (or the file named by `--config` /
//! `TAGNAV_CONFIG`).
//!
//! Required keys fail fast: a missing `aruco_target`, `final_destination`,
//! `final_destination.frame_id`, expected `final_destination.aruco_<id>`
//! entry or coordinate of any of those points is reported as
//! [`NavError::ConfigurationMissing`] naming the full key, e.g.
//! `final_destination.aruco_1.y`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tagnav_perception::transform::DEFAULT_DYNAMIC_TTL;
use tagnav_perception::{DEFAULT_LOOKUP_TIMEOUT, TfEngine, Transform3D};
use tagnav_runtime::{DEFAULT_EXPECTED_MARKERS, DEFAULT_ROTATION_SPEED, DestinationCatalog};
use tagnav_types::{Goal, MarkerId, NavError};

/// File used when neither `--config` nor `TAGNAV_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "tagnav.toml";

const DESTINATION_PREFIX: &str = "aruco_";

/// An `{ x = .., y = .. }` table.  Both coordinates are required; they are
/// optional here so a missing one can be reported by name.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Point {
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl Point {
    /// Both coordinates, or [`NavError::ConfigurationMissing`] naming
    /// `{key}.x` / `{key}.y`.
    fn require(self, key: &str) -> Result<(f64, f64), NavError> {
        let x = self
            .x
            .ok_or_else(|| NavError::ConfigurationMissing(format!("{key}.x")))?;
        let y = self
            .y
            .ok_or_else(|| NavError::ConfigurationMissing(format!("{key}.y")))?;
        Ok((x, y))
    }
}

/// `[navigation]` – every key optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NavigationConfig {
    /// Frame the motion controller expects goals in.
    #[serde(default = "default_working_frame")]
    pub working_frame: String,

    /// Bound on the frame-graph wait, in milliseconds.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Lifetime of time-stamped relations, in milliseconds.
    #[serde(default = "default_dynamic_ttl_ms")]
    pub dynamic_ttl_ms: u64,

    /// Yaw rate while searching, in rad/s.
    #[serde(default = "default_rotation_speed")]
    pub rotation_speed: f64,

    /// Marker ids that must have a destination.
    #[serde(default = "default_expected_markers")]
    pub expected_markers: Vec<MarkerId>,
}

fn default_working_frame() -> String {
    "odom".to_string()
}
fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64
}
fn default_dynamic_ttl_ms() -> u64 {
    DEFAULT_DYNAMIC_TTL.as_millis() as u64
}
fn default_rotation_speed() -> f64 {
    DEFAULT_ROTATION_SPEED
}
fn default_expected_markers() -> Vec<MarkerId> {
    DEFAULT_EXPECTED_MARKERS.to_vec()
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            working_frame: default_working_frame(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            dynamic_ttl_ms: default_dynamic_ttl_ms(),
            rotation_speed: default_rotation_speed(),
            expected_markers: default_expected_markers(),
        }
    }
}

impl NavigationConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn dynamic_ttl(&self) -> Duration {
        Duration::from_millis(self.dynamic_ttl_ms)
    }
}

/// One `[[static_frames]]` entry seeded into the frame graph at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticFrame {
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Rotation about z, in radians.
    #[serde(default)]
    pub yaw: f64,
}

/// File layout as written by the operator.
#[derive(Debug, Deserialize)]
struct ParameterFile {
    aruco_target: Option<Point>,
    final_destination: Option<DestinationTable>,
    #[serde(default)]
    navigation: NavigationConfig,
    #[serde(default)]
    static_frames: Vec<StaticFrame>,
}

#[derive(Debug, Deserialize)]
struct DestinationTable {
    frame_id: Option<String>,
    #[serde(flatten)]
    entries: BTreeMap<String, Point>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog: DestinationCatalog,
    pub navigation: NavigationConfig,
    pub static_frames: Vec<StaticFrame>,
}

impl Config {
    /// Frame graph buffer pre-loaded with every `[[static_frames]]` entry.
    pub fn seeded_engine(&self) -> Result<TfEngine, NavError> {
        let mut engine = TfEngine::with_dynamic_ttl(self.navigation.dynamic_ttl());
        for frame in &self.static_frames {
            engine.set_static(
                &frame.parent,
                &frame.child,
                Transform3D::from_xy_yaw(frame.x, frame.y, frame.yaw),
            )?;
        }
        Ok(engine)
    }
}

/// Load, validate and apply env overrides.
pub fn load_from(path: &Path) -> Result<Config, NavError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        NavError::ConfigurationInvalid(format!("cannot read {}: {e}", path.display()))
    })?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg.navigation);
    validate_navigation(&cfg.navigation)?;
    Ok(cfg)
}

/// Parse and validate a parameter file's contents.
pub fn parse(raw: &str) -> Result<Config, NavError> {
    let file: ParameterFile = toml::from_str(raw)
        .map_err(|e| NavError::ConfigurationInvalid(format!("failed to parse parameters: {e}")))?;

    let (target_x, target_y) = file
        .aruco_target
        .ok_or_else(|| NavError::ConfigurationMissing("aruco_target".to_string()))?
        .require("aruco_target")?;
    let destinations = file
        .final_destination
        .ok_or_else(|| NavError::ConfigurationMissing("final_destination".to_string()))?;
    let frame_id = destinations
        .frame_id
        .ok_or_else(|| NavError::ConfigurationMissing("final_destination.frame_id".to_string()))?;

    let mut entries = Vec::with_capacity(destinations.entries.len());
    for (key, point) in destinations.entries {
        let id = key
            .strip_prefix(DESTINATION_PREFIX)
            .and_then(|suffix| suffix.parse::<MarkerId>().ok())
            .ok_or_else(|| {
                NavError::ConfigurationInvalid(format!(
                    "final_destination.{key}: expected {DESTINATION_PREFIX}<id>"
                ))
            })?;
        entries.push((id, point.require(&format!("final_destination.{key}"))?));
    }

    let catalog = DestinationCatalog::new(
        frame_id,
        Goal::new(target_x, target_y),
        entries,
        &file.navigation.expected_markers,
    )?;

    validate_navigation(&file.navigation)?;

    Ok(Config {
        catalog,
        navigation: file.navigation,
        static_frames: file.static_frames,
    })
}

/// Apply `TAGNAV_*` environment variable overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `TAGNAV_WORKING_FRAME` | `navigation.working_frame` |
/// | `TAGNAV_LOOKUP_TIMEOUT_MS` | `navigation.lookup_timeout_ms` |
/// | `TAGNAV_ROTATION_SPEED` | `navigation.rotation_speed` |
///
/// Unparsable numbers are ignored.
pub fn apply_env_overrides(nav: &mut NavigationConfig) {
    if let Ok(v) = std::env::var("TAGNAV_WORKING_FRAME")
        && !v.trim().is_empty()
    {
        nav.working_frame = v;
    }
    if let Ok(v) = std::env::var("TAGNAV_LOOKUP_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        nav.lookup_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("TAGNAV_ROTATION_SPEED")
        && let Ok(speed) = v.parse::<f64>()
    {
        nav.rotation_speed = speed;
    }
}

fn validate_navigation(nav: &NavigationConfig) -> Result<(), NavError> {
    if nav.working_frame.trim().is_empty() {
        return Err(NavError::ConfigurationMissing("navigation.working_frame".to_string()));
    }
    if nav.lookup_timeout_ms == 0 {
        return Err(NavError::ConfigurationInvalid(
            "navigation.lookup_timeout_ms must be positive".to_string(),
        ));
    }
    if !nav.rotation_speed.is_finite() {
        return Err(NavError::ConfigurationInvalid(
            "navigation.rotation_speed must be finite".to_string(),
        ));
    }
    Ok(())
}

/// Held by every test in this crate that reads or writes the process
/// environment, which is shared between test threads.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Run `f` with `key` set to `value`, then remove it again.
    fn with_env<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: every test in this crate that reads or writes the
        // environment holds ENV_LOCK, so no other thread touches it here.
        unsafe { std::env::set_var(key, value) };
        let out = f();
        unsafe { std::env::remove_var(key) };
        out
    }

    const FULL: &str = r#"
[aruco_target]
x = 1.0
y = -1.5

[final_destination]
frame_id = "origin1"
aruco_0 = { x = 1.0, y = 2.0 }
aruco_1 = { x = -1.0, y = 2.0 }
aruco_2 = { x = -1.0, y = -2.0 }
aruco_3 = { x = 1.0, y = -2.0 }

[navigation]
working_frame = "map"
lookup_timeout_ms = 250

[[static_frames]]
parent = "map"
child = "origin1"
x = 0.5
yaw = 1.5707963267948966
"#;

    #[test]
    fn parses_full_file() {
        let cfg = parse(FULL).expect("valid parameters");
        assert_eq!(cfg.catalog.reference_frame(), "origin1");
        assert_eq!(cfg.catalog.initial_goal(), Goal::new(1.0, -1.5));
        assert_eq!(cfg.catalog.lookup(1).unwrap().x, -1.0);
        assert_eq!(cfg.navigation.working_frame, "map");
        assert_eq!(cfg.navigation.lookup_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.static_frames.len(), 1);
        assert_eq!(cfg.static_frames[0].y, 0.0);
    }

    #[test]
    fn navigation_defaults_apply_when_section_absent() {
        let raw = FULL.split("[navigation]").next().unwrap();
        let cfg = parse(raw).expect("valid parameters");
        assert_eq!(cfg.navigation, NavigationConfig::default());
        assert_eq!(cfg.navigation.working_frame, "odom");
        assert_eq!(cfg.navigation.lookup_timeout_ms, 1000);
        assert_eq!(cfg.navigation.dynamic_ttl_ms, 10_000);
        assert!(cfg.static_frames.is_empty());
    }

    #[test]
    fn missing_aruco_target_is_reported() {
        let raw = FULL.replace("[aruco_target]\nx = 1.0\ny = -1.5\n", "");
        let err = parse(&raw).unwrap_err();
        assert_eq!(err, NavError::ConfigurationMissing("aruco_target".to_string()));
    }

    #[test]
    fn missing_frame_id_is_reported() {
        let raw = FULL.replace("frame_id = \"origin1\"\n", "");
        let err = parse(&raw).unwrap_err();
        assert_eq!(
            err,
            NavError::ConfigurationMissing("final_destination.frame_id".to_string())
        );
    }

    #[test]
    fn missing_expected_destination_is_reported() {
        let raw = FULL.replace("aruco_2 = { x = -1.0, y = -2.0 }\n", "");
        let err = parse(&raw).unwrap_err();
        assert_eq!(
            err,
            NavError::ConfigurationMissing("final_destination.aruco_2".to_string())
        );
    }

    #[test]
    fn expected_markers_can_be_narrowed() {
        let raw = FULL
            .replace("aruco_2 = { x = -1.0, y = -2.0 }\n", "")
            .replace("working_frame = \"map\"", "working_frame = \"map\"\nexpected_markers = [0, 1, 3]");
        let cfg = parse(&raw).expect("aruco_2 no longer required");
        assert_eq!(cfg.catalog.lookup(2), Err(NavError::UnknownMarkerId(2)));
    }

    #[test]
    fn missing_target_coordinate_names_the_key() {
        let raw = FULL.replace("y = -1.5\n", "");
        let err = parse(&raw).unwrap_err();
        assert_eq!(err, NavError::ConfigurationMissing("aruco_target.y".to_string()));
    }

    #[test]
    fn missing_destination_coordinate_names_the_key() {
        let raw = FULL.replace("aruco_1 = { x = -1.0, y = 2.0 }", "aruco_1 = { y = 2.0 }");
        let err = parse(&raw).unwrap_err();
        assert_eq!(
            err,
            NavError::ConfigurationMissing("final_destination.aruco_1.x".to_string())
        );

        let raw = FULL.replace("aruco_3 = { x = 1.0, y = -2.0 }", "aruco_3 = { x = 1.0 }");
        let err = parse(&raw).unwrap_err();
        assert_eq!(
            err,
            NavError::ConfigurationMissing("final_destination.aruco_3.y".to_string())
        );
    }

    #[test]
    fn malformed_destination_key_is_invalid() {
        let raw = FULL.replace("aruco_3 =", "marker_3 =");
        assert!(matches!(parse(&raw), Err(NavError::ConfigurationInvalid(_))));
    }

    #[test]
    fn zero_lookup_timeout_is_invalid() {
        let raw = FULL.replace("lookup_timeout_ms = 250", "lookup_timeout_ms = 0");
        assert!(matches!(parse(&raw), Err(NavError::ConfigurationInvalid(_))));
    }

    #[test]
    fn load_from_missing_file_is_invalid() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NavError::ConfigurationInvalid(msg) if msg.contains("absent.toml")));
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp file");
        file.write_all(FULL.as_bytes()).expect("write");
        let cfg = {
            let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            load_from(file.path()).expect("load")
        };
        assert_eq!(cfg.catalog.marker_ids().count(), 4);
    }

    #[test]
    fn seeded_engine_contains_static_frames() {
        let cfg = parse(FULL).unwrap();
        let engine = cfg.seeded_engine().unwrap();
        assert_eq!(engine.parent_of("origin1"), Some("map"));
    }

    #[test]
    fn apply_env_overrides_changes_working_frame() {
        let nav = with_env("TAGNAV_WORKING_FRAME", "base_footprint", || {
            let mut nav = NavigationConfig::default();
            apply_env_overrides(&mut nav);
            nav
        });
        assert_eq!(nav.working_frame, "base_footprint");
    }

    #[test]
    fn apply_env_overrides_changes_lookup_timeout() {
        let nav = with_env("TAGNAV_LOOKUP_TIMEOUT_MS", "2500", || {
            let mut nav = NavigationConfig::default();
            apply_env_overrides(&mut nav);
            nav
        });
        assert_eq!(nav.lookup_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_rotation_speed() {
        let nav = with_env("TAGNAV_ROTATION_SPEED", "fast", || {
            let mut nav = NavigationConfig::default();
            apply_env_overrides(&mut nav);
            nav
        });
        assert_eq!(nav.rotation_speed, DEFAULT_ROTATION_SPEED);
    }
}
