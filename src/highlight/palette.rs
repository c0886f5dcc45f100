pub const DEFAULT_COLOR: &str = "#facc15";
pub const FORCED_TEXT_COLOR: &str = "#000000";
pub const TRANSPARENT: &str = "transparent";

pub const PALETTE: [&str; 5] = ["#facc15", "#4ade80", "#38bdf8", "#fb7185", "#a78bfa"];

const LIGHT_VARIANTS: [(&str, &str); 5] = [
    ("#facc15", "#fef08a"), // yellow
    ("#4ade80", "#bbf7d0"), // green
    ("#38bdf8", "#bae6fd"), // blue
    ("#fb7185", "#fecdd3"), // pink
    ("#a78bfa", "#ddd6fe"), // purple
];

/// Display color for a base color. Unknown colors pass through unchanged.
pub fn adaptive_color(base: &str) -> String {
    LIGHT_VARIANTS
        .iter()
        .find(|(b, _)| b.eq_ignore_ascii_case(base))
        .map(|(_, light)| light.to_string())
        .unwrap_or_else(|| base.to_string())
}
