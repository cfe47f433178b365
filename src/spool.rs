//! # Spool Physical Model
//!
//! Converts between the three views of how much filament is left on a spool:
//! remaining length, remaining mass, and the outer radius of the winding.
//!
//! ## Geometry
//! The winding is treated as a solid annulus between the hub (`min_d / 2`) and
//! the current outer radius, across the inner width of the spool. Its volume
//! divided by the filament cross-section gives the remaining length:
//!
//! ```text
//! length = π · width · (r² − r_core²) / (π · (d_fil / 2)²)
//! ```
//!
//! One revolution of the spool pays out one circumference at the current radius,
//! so consumption per revolution shrinks as the spool empties.
//!
//! ## Units
//! Diameters, radii and widths are millimetres; lengths are metres; masses are
//! grams. Remaining quantities are rounded to three decimals after each step so
//! the tag text does not grow with float noise.

use crate::tag_store::TagPayload;
use std::f64::consts::PI;
use thiserror::Error;

/// Filament diameter assumed when the tag does not say.
pub const DEFAULT_FILAMENT_DIAMETER_MM: f64 = 1.75;

/// Document version written to tags that do not carry one.
pub const DOCUMENT_VERSION: u32 = 1;

/// PLA density, used when the material is unknown.
pub const DEFAULT_DENSITY_G_CM3: f64 = 1.24;

/// Reasons a tag document cannot drive the model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("tag document is missing '{name}'")]
    MissingField { name: &'static str },

    #[error("'{name}' is not a finite number")]
    NonFinite { name: &'static str },

    #[error("invalid spool geometry: {0}")]
    InvalidGeometry(String),
}

/// A validated spool document with every optional field filled in.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub version: u32,
    pub brand: Option<String>,
    pub material_type: Option<String>,
    pub filament_diameter: f64,
    pub min_diameter: f64,
    pub max_diameter: f64,
    pub width: f64,
    pub grams_full: f64,
    pub grams_remaining: f64,
    pub meters_full: f64,
    pub meters_remaining: f64,
    /// Keys on the tag this crate does not interpret
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl From<&Document> for TagPayload {
    fn from(doc: &Document) -> Self {
        TagPayload {
            version: Some(doc.version),
            brand: doc.brand.clone(),
            material_type: doc.material_type.clone(),
            filament_diameter: Some(doc.filament_diameter),
            min_diameter: Some(doc.min_diameter),
            max_diameter: Some(doc.max_diameter),
            width: Some(doc.width),
            grams_full: Some(doc.grams_full),
            grams_remaining: Some(doc.grams_remaining),
            meters_full: Some(doc.meters_full),
            meters_remaining: Some(doc.meters_remaining),
            extra: doc.extra.clone(),
        }
    }
}

/// Validated document plus the geometry derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct SpoolState {
    pub document: Document,
    /// Hub radius in mm (empty spool)
    pub core_radius: f64,
    /// Flange radius in mm (full spool)
    pub max_radius: f64,
    /// Inner width in mm
    pub width: f64,
    /// Linear density in g/m
    pub grams_per_meter: f64,
}

impl SpoolState {
    /// Filament cross-section in mm².
    pub fn filament_area(&self) -> f64 {
        filament_area(self.document.filament_diameter)
    }

    /// Outer radius implied by the remaining length.
    pub fn current_radius(&self) -> f64 {
        radius_from_length(
            self.document.meters_remaining,
            self.core_radius,
            self.width,
            self.max_radius,
            self.filament_area(),
        )
    }
}

/// Filament paid out by one revolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Consumption {
    pub meters: f64,
    pub grams: f64,
}

/// Cross-section area in mm² of filament with the given diameter.
pub fn filament_area(diameter_mm: f64) -> f64 {
    PI * (diameter_mm / 2.0).powi(2)
}

/// Remaining length (m) of filament wound out to `radius`.
///
/// Returns 0 when the winding is empty or the geometry is degenerate.
pub fn length_from_radius(radius: f64, core_radius: f64, width: f64, filament_area: f64) -> f64 {
    let shell = (radius.powi(2) - core_radius.powi(2)).max(0.0);
    if shell <= 0.0 || width <= 0.0 || filament_area <= 0.0 {
        return 0.0;
    }
    let volume_mm3 = PI * width * shell;
    volume_mm3 / filament_area / 1000.0
}

/// Outer radius (mm) of a winding holding `length` metres, within `[core, max]`.
pub fn radius_from_length(
    length: f64,
    core_radius: f64,
    width: f64,
    max_radius: f64,
    filament_area: f64,
) -> f64 {
    if width <= 0.0 {
        return core_radius;
    }
    let length_mm = length.max(0.0) * 1000.0;
    let shell = length_mm * filament_area / (PI * width);
    let radius = (core_radius.powi(2) + shell).max(core_radius.powi(2)).sqrt();
    radius.clamp(core_radius, max_radius.max(core_radius))
}

/// Filament (m) consumed by one revolution at the current radius.
pub fn meters_per_rotation(state: &SpoolState) -> f64 {
    let radius = state.current_radius();
    if radius <= 0.0 {
        return 0.0;
    }
    (2.0 * PI * radius / 1000.0).max(0.0)
}

/// Linear density (g/m) of the filament on this spool.
///
/// Uses the full-spool figures when both are known, otherwise the material's
/// volumetric density times the cross-section.
pub fn grams_per_meter(doc: &Document) -> f64 {
    if doc.meters_full > 0.0 && doc.grams_full > 0.0 {
        return doc.grams_full / doc.meters_full;
    }
    // mm² · g/cm³ = g/m
    filament_area(doc.filament_diameter) * material_density(doc.material_type.as_deref())
}

/// Volumetric density (g/cm³) for common printing materials.
pub fn material_density(material: Option<&str>) -> f64 {
    let Some(material) = material else {
        return DEFAULT_DENSITY_G_CM3;
    };
    match material.trim().to_ascii_uppercase().as_str() {
        "PETG" | "PET" => 1.27,
        "ABS" => 1.04,
        "ASA" => 1.07,
        "TPU" => 1.21,
        "NYLON" | "PA" => 1.14,
        _ => DEFAULT_DENSITY_G_CM3,
    }
}

/// Validate a tag document and derive the spool model from it.
///
/// Missing full-spool figures are derived: `meters_full` from the geometry at
/// the flange radius, `grams_full` from the current `grams_remaining`. The
/// remaining quantities are clamped into `[0, full]`.
pub fn normalise(payload: &TagPayload) -> Result<SpoolState, ValidationError> {
    let min_diameter = require(payload.min_diameter, "min_diameter")?;
    let max_diameter = require(payload.max_diameter, "max_diameter")?;
    let width = require(payload.width, "width")?;
    let grams_remaining = require(payload.grams_remaining, "grams_remaining")?;
    let meters_remaining = require(payload.meters_remaining, "meters_remaining")?;

    let filament_diameter = match payload.filament_diameter {
        Some(d) => finite(d, "filament_diameter")?,
        None => DEFAULT_FILAMENT_DIAMETER_MM,
    };

    if width <= 0.0 {
        return Err(ValidationError::InvalidGeometry(format!(
            "width {} must be positive",
            width
        )));
    }
    if min_diameter < 0.0 || max_diameter <= min_diameter {
        return Err(ValidationError::InvalidGeometry(format!(
            "diameters must satisfy 0 <= min ({}) < max ({})",
            min_diameter, max_diameter
        )));
    }
    if filament_diameter <= 0.0 {
        return Err(ValidationError::InvalidGeometry(format!(
            "filament diameter {} must be positive",
            filament_diameter
        )));
    }

    let core_radius = min_diameter / 2.0;
    let max_radius = max_diameter / 2.0;

    let meters_full = match payload.meters_full {
        Some(m) if m.is_finite() && m > 0.0 => m,
        _ => length_from_radius(max_radius, core_radius, width, filament_area(filament_diameter)),
    };
    let grams_full = match payload.grams_full {
        Some(g) if g.is_finite() && g > 0.0 => g,
        _ => grams_remaining.max(0.0),
    };

    let document = Document {
        version: payload.version.unwrap_or(DOCUMENT_VERSION),
        brand: payload.brand.clone(),
        material_type: payload.material_type.clone(),
        filament_diameter,
        min_diameter,
        max_diameter,
        width,
        grams_full,
        grams_remaining: grams_remaining.clamp(0.0, grams_full),
        meters_full,
        meters_remaining: meters_remaining.clamp(0.0, meters_full),
        extra: payload.extra.clone(),
    };
    let grams_per_meter = grams_per_meter(&document);

    Ok(SpoolState {
        document,
        core_radius,
        max_radius,
        width,
        grams_per_meter,
    })
}

/// Charge one revolution against the spool.
///
/// Returns `None` when the model says a revolution pays out nothing.
pub fn consume_rotation(state: &mut SpoolState) -> Option<Consumption> {
    let meters = meters_per_rotation(state);
    if meters <= 0.0 {
        return None;
    }
    let grams = meters * state.grams_per_meter;

    let doc = &mut state.document;
    doc.meters_remaining = round3((doc.meters_remaining - meters).max(0.0)).min(doc.meters_full);
    doc.grams_remaining = round3((doc.grams_remaining - grams).max(0.0)).min(doc.grams_full);

    Some(Consumption { meters, grams })
}

/// Round to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn require(value: Option<f64>, name: &'static str) -> Result<f64, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField { name })?;
    finite(value, name)
}

fn finite(value: f64, name: &'static str) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonFinite { name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sunlu_payload() -> TagPayload {
        TagPayload {
            material_type: Some("PLA".to_string()),
            min_diameter: Some(52.0),
            max_diameter: Some(200.0),
            width: Some(67.0),
            grams_full: Some(950.0),
            grams_remaining: Some(950.0),
            meters_remaining: Some(10_000.0),
            ..TagPayload::default()
        }
    }

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_reference_spool() {
        let state = normalise(&sunlu_payload()).unwrap();
        let doc = &state.document;

        assert_eq!(state.core_radius, 26.0);
        assert_eq!(state.max_radius, 100.0);
        assert_eq!(doc.version, 1);
        assert_eq!(doc.filament_diameter, 1.75);
        assert!(approx(doc.meters_full, 815.945, 0.001), "{}", doc.meters_full);
        // Remaining length above full is clamped
        assert_eq!(doc.meters_remaining, doc.meters_full);
        assert!(approx(state.grams_per_meter, 950.0 / doc.meters_full, 1e-12));
    }

    #[test]
    fn test_one_rotation_at_full_radius() {
        let mut state = normalise(&sunlu_payload()).unwrap();
        let meters_before = state.document.meters_remaining;
        let grams_before = state.document.grams_remaining;

        let step = consume_rotation(&mut state).unwrap();
        assert!(approx(step.meters, 0.628, 0.001), "{}", step.meters);
        assert!(approx(step.grams, step.meters * 950.0 / state.document.meters_full, 1e-9));

        assert!(approx(state.document.meters_remaining, meters_before - step.meters, 0.001));
        assert!(approx(state.document.grams_remaining, grams_before - step.grams, 0.001));
        assert_eq!(state.document.meters_remaining, round3(state.document.meters_remaining));
    }

    #[test]
    fn test_missing_required_field() {
        let mut payload = sunlu_payload();
        payload.width = None;
        assert_eq!(
            normalise(&payload),
            Err(ValidationError::MissingField { name: "width" })
        );

        let mut payload = sunlu_payload();
        payload.meters_remaining = None;
        assert_eq!(
            normalise(&payload),
            Err(ValidationError::MissingField { name: "meters_remaining" })
        );
    }

    #[test]
    fn test_invalid_geometry() {
        let mut payload = sunlu_payload();
        payload.max_diameter = Some(40.0);
        assert!(matches!(
            normalise(&payload),
            Err(ValidationError::InvalidGeometry(_))
        ));

        let mut payload = sunlu_payload();
        payload.width = Some(0.0);
        assert!(matches!(
            normalise(&payload),
            Err(ValidationError::InvalidGeometry(_))
        ));

        let mut payload = sunlu_payload();
        payload.grams_remaining = Some(f64::NAN);
        assert_eq!(
            normalise(&payload),
            Err(ValidationError::NonFinite { name: "grams_remaining" })
        );
    }

    #[test]
    fn test_grams_full_defaults_to_remaining() {
        let mut payload = sunlu_payload();
        payload.grams_full = None;
        payload.grams_remaining = Some(420.0);
        let state = normalise(&payload).unwrap();
        assert_eq!(state.document.grams_full, 420.0);
        assert_eq!(state.document.grams_remaining, 420.0);
    }

    #[test]
    fn test_negative_remaining_is_clamped() {
        let mut payload = sunlu_payload();
        payload.grams_remaining = Some(-3.0);
        payload.meters_remaining = Some(-1.0);
        let state = normalise(&payload).unwrap();
        assert_eq!(state.document.grams_remaining, 0.0);
        assert_eq!(state.document.meters_remaining, 0.0);
    }

    #[test]
    fn test_material_density_fallback() {
        let mut payload = sunlu_payload();
        payload.grams_full = None;
        payload.grams_remaining = Some(0.0);
        payload.material_type = Some("petg".to_string());
        let state = normalise(&payload).unwrap();
        let expected = filament_area(1.75) * 1.27;
        assert!(approx(state.grams_per_meter, expected, 1e-12));
        // 1.75 mm PETG weighs roughly 3 g per metre
        assert!(approx(state.grams_per_meter, 3.05, 0.01));

        assert_eq!(material_density(None), DEFAULT_DENSITY_G_CM3);
        assert_eq!(material_density(Some("wood-fill")), DEFAULT_DENSITY_G_CM3);
    }

    #[test]
    fn test_normalise_is_idempotent() {
        let first = normalise(&sunlu_payload()).unwrap();
        let second = normalise(&TagPayload::from(&first.document)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_length_radius_inverse() {
        let area = filament_area(1.75);
        let length = length_from_radius(70.0, 26.0, 67.0, area);
        let radius = radius_from_length(length, 26.0, 67.0, 100.0, area);
        assert!(approx(radius, 70.0, 1e-9));

        assert_eq!(length_from_radius(20.0, 26.0, 67.0, area), 0.0);
        assert_eq!(length_from_radius(70.0, 26.0, 0.0, area), 0.0);
        assert_eq!(radius_from_length(1e9, 26.0, 67.0, 100.0, area), 100.0);
        assert_eq!(radius_from_length(0.0, 26.0, 67.0, 100.0, area), 26.0);
    }

    #[test]
    fn test_empty_spool_stays_at_zero() {
        let mut payload = sunlu_payload();
        payload.meters_remaining = Some(0.0005);
        payload.grams_remaining = Some(0.0001);
        let mut state = normalise(&payload).unwrap();

        let step = consume_rotation(&mut state).unwrap();
        // Hub circumference
        assert!(approx(step.meters, 2.0 * PI * 26.0 / 1000.0, 1e-5));
        assert_eq!(state.document.meters_remaining, 0.0);
        assert_eq!(state.document.grams_remaining, 0.0);
    }

    #[test]
    fn test_zero_core_empty_spool_consumes_nothing() {
        let mut payload = sunlu_payload();
        payload.min_diameter = Some(0.0);
        payload.meters_remaining = Some(0.0);
        let mut state = normalise(&payload).unwrap();
        assert_eq!(meters_per_rotation(&state), 0.0);
        assert_eq!(consume_rotation(&mut state), None);
    }

    /// A full-spool figure that is missing, non-positive or usable.
    fn full_figure() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![
            Just(None),
            (-100.0f64..=0.0).prop_map(Some),
            (1.0f64..3000.0).prop_map(Some),
        ]
    }

    proptest! {
        #[test]
        fn prop_rotation_shrinks_with_remaining(a in 0.0f64..815.0, b in 0.0f64..815.0) {
            prop_assume!((a - b).abs() > 1e-3);
            let (low, high) = if a < b { (a, b) } else { (b, a) };

            let mut payload = sunlu_payload();
            payload.meters_remaining = Some(low);
            let low_state = normalise(&payload).unwrap();
            payload.meters_remaining = Some(high);
            let high_state = normalise(&payload).unwrap();

            prop_assert!(meters_per_rotation(&low_state) < meters_per_rotation(&high_state));
        }

        #[test]
        fn prop_remaining_stays_in_range(
            grams in -100.0f64..2000.0,
            meters in -100.0f64..2000.0,
            rotations in 0usize..50,
        ) {
            let mut payload = sunlu_payload();
            payload.grams_remaining = Some(grams);
            payload.meters_remaining = Some(meters);
            let mut state = normalise(&payload).unwrap();

            for _ in 0..=rotations {
                let doc = &state.document;
                prop_assert!((0.0..=doc.grams_full).contains(&doc.grams_remaining));
                prop_assert!((0.0..=doc.meters_full).contains(&doc.meters_remaining));
                consume_rotation(&mut state);
            }
        }

        #[test]
        fn prop_normalise_is_idempotent(
            material in prop::option::of(prop::sample::select(vec!["PLA", "PETG", "ABS", "TPU", "NYLON", "wood"])),
            grams_full in full_figure(),
            meters_full in full_figure(),
            grams in -100.0f64..3000.0,
            meters in -100.0f64..3000.0,
        ) {
            let mut payload = sunlu_payload();
            payload.material_type = material.map(str::to_string);
            payload.grams_full = grams_full;
            payload.meters_full = meters_full;
            payload.grams_remaining = Some(grams);
            payload.meters_remaining = Some(meters);

            let first = normalise(&payload).unwrap();
            let second = normalise(&TagPayload::from(&first.document)).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
