//! Score → color mapping for the similar documents list.
//!
//! Scores are normalized against the min/max of their own result batch and
//! blended between the two gradient endpoints in HSV space, so hue-adjacent
//! endpoints don't sweep through the whole color wheel.

use serde::{Deserialize, Serialize};

const DEFAULT_GRADIENT_NAME: &str = "Voyager";
const DEFAULT_START_COLOR: &str = "#009FFF";
const DEFAULT_END_COLOR: &str = "#ec2F4B";

/// Named gradients selectable with `gradient --preset`, as (name, start, end).
pub const PRESETS: [(&str, &str, &str); 6] = [
    ("By Design", "#009FFF", "#ec2F4B"),
    ("Pacific Dream", "#34e89e", "#0f3443"),
    ("Purpink", "#7F00FF", "#E100FF"),
    ("Wiretap", "#8A2387", "#F27121"),
    ("Sublime Light", "#FC5C7D", "#6A82FB"),
    ("Shifter", "#bc4e9c", "#f80759"),
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ColorError {
    #[error("invalid hex color {0:?}, expected #RRGGBB or #RGB")]
    InvalidHex(String),
}

/// Two-color gradient used to encode relevance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientSpec {
    #[serde(default = "default_gradient_name")]
    pub name: String,
    pub start_color: String,
    pub end_color: String,
}

impl Default for GradientSpec {
    fn default() -> Self {
        Self {
            name: DEFAULT_GRADIENT_NAME.to_string(),
            start_color: DEFAULT_START_COLOR.to_string(),
            end_color: DEFAULT_END_COLOR.to_string(),
        }
    }
}

fn default_gradient_name() -> String {
    DEFAULT_GRADIENT_NAME.to_string()
}

impl GradientSpec {
    pub fn new(start_color: &str, end_color: &str) -> Self {
        Self {
            name: DEFAULT_GRADIENT_NAME.to_string(),
            start_color: start_color.to_string(),
            end_color: end_color.to_string(),
        }
    }

    /// Looks a preset up by name. Case, spaces and dashes are ignored, so
    /// `pacific-dream` finds "Pacific Dream".
    pub fn preset(name: &str) -> Option<Self> {
        let wanted = preset_key(name);
        PRESETS
            .iter()
            .find(|(preset, _, _)| preset_key(preset) == wanted)
            .map(|(preset, start, end)| Self {
                name: preset.to_string(),
                start_color: start.to_string(),
                end_color: end.to_string(),
            })
    }

    /// The preset whose colors this gradient uses, if any.
    pub fn preset_name(&self) -> Option<&'static str> {
        PRESETS
            .iter()
            .find(|(_, start, end)| {
                start.eq_ignore_ascii_case(&self.start_color) && end.eq_ignore_ascii_case(&self.end_color)
            })
            .map(|(name, _, _)| *name)
    }

    pub fn validate(&self) -> Result<(), ColorError> {
        Rgb::from_hex(&self.start_color)?;
        Rgb::from_hex(&self.end_color)?;
        Ok(())
    }
}

fn preset_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn from_hex(hex: &str) -> Result<Rgb, ColorError> {
        let invalid = || ColorError::InvalidHex(hex.to_string());
        let digits = hex.trim().strip_prefix('#').ok_or_else(invalid)?;

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

        match digits.len() {
            6 => Ok(Rgb {
                r: channel(&digits[0..2])?,
                g: channel(&digits[2..4])?,
                b: channel(&digits[4..6])?,
            }),
            // #abc is shorthand for #aabbcc
            3 => Ok(Rgb {
                r: channel(&digits[0..1])? * 17,
                g: channel(&digits[1..2])? * 17,
                b: channel(&digits[2..3])? * 17,
            }),
            _ => Err(invalid()),
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl From<Rgb> for Hsv {
    fn from(rgb: Rgb) -> Self {
        let r = rgb.r as f64 / 255.0;
        let g = rgb.g as f64 / 255.0;
        let b = rgb.b as f64 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let d = max - min;

        let s = if max == 0.0 { 0.0 } else { d / max };

        let h = if d == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / d).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / d + 2.0)
        } else {
            60.0 * ((r - g) / d + 4.0)
        };

        Hsv { h, s, v: max }
    }
}

impl From<Hsv> for Rgb {
    fn from(hsv: Hsv) -> Self {
        let h = hsv.h.rem_euclid(360.0) / 60.0;
        let s = hsv.s.clamp(0.0, 1.0);
        let v = hsv.v.clamp(0.0, 1.0);

        let i = h.floor();
        let f = h - i;
        let p = v * (1.0 - s);
        let q = v * (1.0 - f * s);
        let t = v * (1.0 - (1.0 - f) * s);

        let (r, g, b) = match (i as u8) % 6 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };

        let to_u8 = |x: f64| (x * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb {
            r: to_u8(r),
            g: to_u8(g),
            b: to_u8(b),
        }
    }
}

/// Maps `score` into `[0, 1]` relative to the batch range.
///
/// A collapsed range (single result, all scores equal) resolves to `1.0`,
/// i.e. the gradient's end color.
pub fn normalize(score: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range == 0.0 || !range.is_finite() {
        return 1.0;
    }

    let t = (score - min) / range;
    if t.is_nan() {
        return 1.0;
    }
    t.clamp(0.0, 1.0)
}

/// A [`GradientSpec`] with its endpoints pre-converted to HSV.
///
/// Rebuild it whenever the spec changes; everything else is a pure function
/// of the arguments.
#[derive(Clone, Debug)]
pub struct Gradient {
    spec: GradientSpec,
    start: Hsv,
    end: Hsv,
}

impl Gradient {
    pub fn new(spec: &GradientSpec) -> Result<Self, ColorError> {
        let start = Hsv::from(Rgb::from_hex(&spec.start_color)?);
        let end = Hsv::from(Rgb::from_hex(&spec.end_color)?);

        Ok(Self {
            spec: spec.clone(),
            start,
            end,
        })
    }

    pub fn spec(&self) -> &GradientSpec {
        &self.spec
    }

    /// Color at position `t` along the gradient (`0.0` = start, `1.0` = end).
    pub fn color_at(&self, t: f64) -> String {
        let t = if t.is_nan() { 1.0 } else { t.clamp(0.0, 1.0) };

        let mut h1 = self.start.h;
        let mut h2 = self.end.h;

        // take the short way around the hue circle
        if (h2 - h1).abs() > 180.0 {
            if h2 > h1 {
                h1 += 360.0;
            } else {
                h2 += 360.0;
            }
        }

        let hsv = Hsv {
            h: (h1 + (h2 - h1) * t).rem_euclid(360.0),
            s: self.start.s + (self.end.s - self.start.s) * t,
            v: self.start.v + (self.end.v - self.start.v) * t,
        };

        Rgb::from(hsv).to_hex()
    }

    pub fn interpolate(&self, score: f64, min: f64, max: f64) -> String {
        self.color_at(normalize(score, min, max))
    }
}

/// One-shot interpolation straight from a [`GradientSpec`].
pub fn interpolate(
    score: f64,
    min: f64,
    max: f64,
    gradient: &GradientSpec,
) -> Result<String, ColorError> {
    Ok(Gradient::new(gradient)?.interpolate(score, min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &str, expected: &str) {
        let a = Rgb::from_hex(actual).unwrap();
        let e = Rgb::from_hex(expected).unwrap();
        let diff = |x: u8, y: u8| (x as i16 - y as i16).abs();
        assert!(
            diff(a.r, e.r) <= 1 && diff(a.g, e.g) <= 1 && diff(a.b, e.b) <= 1,
            "{actual} is not close to {expected}"
        );
    }

    fn is_valid_hex(color: &str) -> bool {
        color.len() == 7
            && color.starts_with('#')
            && color[1..].chars().all(|c| c.is_ascii_hexdigit())
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(
            Rgb::from_hex("#009FFF").unwrap(),
            Rgb { r: 0, g: 0x9f, b: 0xff }
        );
        assert_eq!(Rgb::from_hex("#fff").unwrap(), Rgb { r: 255, g: 255, b: 255 });
        assert!(Rgb::from_hex("009FFF").is_err());
        assert!(Rgb::from_hex("#00GFFF").is_err());
        assert!(Rgb::from_hex("#00FF").is_err());
    }

    #[test]
    fn test_endpoints_map_to_gradient_colors() {
        let spec = GradientSpec::default();
        let gradient = Gradient::new(&spec).unwrap();

        assert_close(&gradient.interpolate(0.2, 0.2, 0.8), &spec.start_color);
        assert_close(&gradient.interpolate(0.8, 0.2, 0.8), &spec.end_color);
    }

    #[test]
    fn test_output_is_always_valid_hex() {
        let gradient = Gradient::new(&GradientSpec::new("#123456", "#fedcba")).unwrap();
        for i in 0..=100 {
            let score = -3.0 + i as f64 * 0.07;
            let color = gradient.interpolate(score, -3.0, 4.0);
            assert!(is_valid_hex(&color), "{color}");
        }
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let spec = GradientSpec::new("#0000FF", "#FF0000");
        let gradient = Gradient::new(&spec).unwrap();
        assert_close(&gradient.interpolate(-10.0, 0.0, 1.0), "#0000ff");
        assert_close(&gradient.interpolate(10.0, 0.0, 1.0), "#ff0000");
    }

    #[test]
    fn test_degenerate_range_resolves_to_end_color() {
        let spec = GradientSpec::new("#0000FF", "#00FF00");
        for score in [0.0, 5.0, 42.0, -1.0] {
            let color = interpolate(score, 5.0, 5.0, &spec).unwrap();
            assert_close(&color, "#00ff00");
        }
    }

    #[test]
    fn test_hue_takes_short_path_across_zero() {
        // hue 350 -> hue 10 should pass through red, not cyan
        let start = Rgb::from(Hsv { h: 350.0, s: 1.0, v: 1.0 }).to_hex();
        let end = Rgb::from(Hsv { h: 10.0, s: 1.0, v: 1.0 }).to_hex();
        let gradient = Gradient::new(&GradientSpec::new(&start, &end)).unwrap();

        let mid = Hsv::from(Rgb::from_hex(&gradient.color_at(0.5)).unwrap());
        assert!(mid.h < 2.0 || mid.h > 358.0, "midpoint hue was {}", mid.h);
    }

    #[test]
    fn test_interpolation_is_deterministic() {
        let spec = GradientSpec::default();
        let a = interpolate(0.37, 0.1, 0.9, &spec).unwrap();
        let b = interpolate(0.37, 0.1, 0.9, &spec).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_gradient_is_rejected() {
        let spec = GradientSpec::new("red", "#ff0000");
        assert!(matches!(
            Gradient::new(&spec),
            Err(ColorError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(0.5, 0.0, 1.0), 0.5);
        assert_eq!(normalize(3.0, 3.0, 3.0), 1.0);
        assert_eq!(normalize(f64::NAN, 0.0, 1.0), 1.0);
        assert_eq!(normalize(2.0, 0.0, 1.0), 1.0);
    }

    #[test]
    fn test_presets_resolve_by_loose_name() {
        let spec = GradientSpec::preset("pacific-dream").unwrap();
        assert_eq!(spec.name, "Pacific Dream");
        assert_eq!(spec.start_color, "#34e89e");
        assert_eq!(spec.end_color, "#0f3443");

        assert_eq!(GradientSpec::preset("SUBLIME LIGHT").unwrap().name, "Sublime Light");
        assert!(GradientSpec::preset("sunset").is_none());
    }

    #[test]
    fn test_presets_are_valid_and_recognized() {
        for (name, _, _) in PRESETS {
            let spec = GradientSpec::preset(name).unwrap();
            assert!(spec.validate().is_ok(), "{name}");
            assert_eq!(spec.preset_name(), Some(name));
        }

        assert_eq!(GradientSpec::default().preset_name(), Some("By Design"));
        assert_eq!(GradientSpec::new("#000000", "#ffffff").preset_name(), None);
    }
}
