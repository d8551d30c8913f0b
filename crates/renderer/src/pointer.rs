use std::process::Command;

use serde::Deserialize;
use tracing::{debug, trace};

/// Where the `mouse` uniform comes from.
pub(crate) enum PointerSource {
    /// Fixed position, the output centre.
    Static([f32; 2]),
    /// Cursor polled from `hyprctl`, relative to the selected monitor.
    Hyprland { origin: (i32, i32), last: [f32; 2] },
}

#[derive(Debug, Deserialize)]
struct HyprMonitor {
    name: String,
    x: i32,
    y: i32,
}

#[derive(Debug, Deserialize)]
struct HyprCursor {
    x: i32,
    y: i32,
}

impl PointerSource {
    pub(crate) fn detect(enabled: bool, output_name: &str, width: u32, height: u32) -> Self {
        let centre = [(width / 2) as f32, (height / 2) as f32];
        if !enabled {
            return Self::Static(centre);
        }
        if std::env::var_os("HYPRLAND_INSTANCE_SIGNATURE").is_none() {
            debug!("not running under Hyprland; pointer stays centred");
            return Self::Static(centre);
        }
        let origin = hyprctl(&["monitors", "-j"])
            .and_then(|json| monitor_origin(&json, output_name))
            .unwrap_or((0, 0));
        debug!(output = output_name, ?origin, "tracking pointer through hyprctl");
        Self::Hyprland {
            origin,
            last: centre,
        }
    }

    pub(crate) fn poll(&mut self) -> [f32; 2] {
        match self {
            Self::Static(position) => *position,
            Self::Hyprland { origin, last } => {
                if let Some((x, y)) = hyprctl(&["cursorpos", "-j"]).and_then(|json| cursor(&json)) {
                    *last = [(x - origin.0) as f32, (y - origin.1) as f32];
                    trace!(x = last[0], y = last[1], "pointer");
                }
                *last
            }
        }
    }
}

fn hyprctl(args: &[&str]) -> Option<String> {
    let output = Command::new("hyprctl").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

fn monitor_origin(json: &str, name: &str) -> Option<(i32, i32)> {
    let monitors: Vec<HyprMonitor> = serde_json::from_str(json).ok()?;
    monitors
        .into_iter()
        .find(|monitor| monitor.name == name)
        .map(|monitor| (monitor.x, monitor.y))
}

fn cursor(json: &str) -> Option<(i32, i32)> {
    let cursor: HyprCursor = serde_json::from_str(json).ok()?;
    Some((cursor.x, cursor.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONITORS: &str = r#"[
        {"id": 0, "name": "eDP-1", "description": "BOE 0x0BCA", "width": 2256, "height": 1504, "x": 0, "y": 0, "scale": 1.5},
        {"id": 1, "name": "DP-3", "description": "Dell Inc. U2720Q", "width": 3840, "height": 2160, "x": 1504, "y": -200, "scale": 2.0}
    ]"#;

    #[test]
    fn finds_monitor_origin_by_name() {
        assert_eq!(monitor_origin(MONITORS, "DP-3"), Some((1504, -200)));
        assert_eq!(monitor_origin(MONITORS, "eDP-1"), Some((0, 0)));
        assert_eq!(monitor_origin(MONITORS, "HDMI-A-1"), None);
        assert_eq!(monitor_origin("not json", "DP-3"), None);
    }

    #[test]
    fn parses_cursor_position() {
        assert_eq!(cursor(r#"{"x": 1700, "y": 40}"#), Some((1700, 40)));
        assert_eq!(cursor("1700, 40"), None);
    }

    #[test]
    fn disabled_source_stays_centred() {
        let mut source = PointerSource::detect(false, "DP-3", 1920, 1081);
        assert_eq!(source.poll(), [960.0, 540.0]);
        assert_eq!(source.poll(), [960.0, 540.0]);
    }
}
